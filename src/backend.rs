use crate::error::Result;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

pub type Element = f32;

#[cfg(feature = "ndarray")]
pub type MainBackend = burn::backend::NdArray<Element, i32>;
#[cfg(any(feature = "tch-cpu", feature = "tch-gpu"))]
pub type MainBackend = burn::backend::libtorch::LibTorch<Element, i32>;
#[cfg(feature = "wgpu")]
pub type MainBackend = burn::backend::wgpu::Wgpu<Element, i32>;
#[cfg(feature = "cuda")]
pub type MainBackend = burn::backend::Cuda<Element, i32>;

/// Picks the device a run executes on.
///
/// `use_accelerator` is `false` when the user passed `--no-cuda`.
pub trait MainDevice: Backend {
    fn main_device(use_accelerator: bool) -> Result<<Self as Backend>::Device> {
        let _ = use_accelerator;
        Ok(Default::default())
    }
}

#[cfg(feature = "ndarray")]
impl MainDevice for MainBackend {
    fn main_device(use_accelerator: bool) -> Result<<Self as Backend>::Device> {
        if use_accelerator {
            tracing::warn!("ndarray backend has no accelerator, running on the cpu");
        }
        Ok(burn::backend::ndarray::NdArrayDevice::Cpu)
    }
}
#[cfg(feature = "tch-cpu")]
impl MainDevice for MainBackend {
    fn main_device(_use_accelerator: bool) -> Result<<Self as Backend>::Device> {
        Ok(burn::backend::libtorch::LibTorchDevice::Cpu)
    }
}
#[cfg(all(feature = "tch-gpu", not(target_os = "macos")))]
impl MainDevice for MainBackend {
    fn main_device(use_accelerator: bool) -> Result<<Self as Backend>::Device> {
        Ok(if use_accelerator {
            burn::backend::libtorch::LibTorchDevice::Cuda(0)
        } else {
            burn::backend::libtorch::LibTorchDevice::Cpu
        })
    }
}
#[cfg(all(feature = "tch-gpu", target_os = "macos"))]
impl MainDevice for MainBackend {
    fn main_device(use_accelerator: bool) -> Result<<Self as Backend>::Device> {
        Ok(if use_accelerator {
            burn::backend::libtorch::LibTorchDevice::Mps
        } else {
            burn::backend::libtorch::LibTorchDevice::Cpu
        })
    }
}
#[cfg(feature = "wgpu")]
impl MainDevice for MainBackend {
    fn main_device(use_accelerator: bool) -> Result<<Self as Backend>::Device> {
        Ok(if use_accelerator {
            burn::backend::wgpu::WgpuDevice::DefaultDevice
        } else {
            burn::backend::wgpu::WgpuDevice::Cpu
        })
    }
}
#[cfg(feature = "cuda")]
impl MainDevice for MainBackend {
    fn main_device(use_accelerator: bool) -> Result<<Self as Backend>::Device> {
        if use_accelerator {
            Ok(Default::default())
        } else {
            Err(crate::error::Error::DeviceUnavailable(
                "the cuda backend has no cpu device, rebuild with another backend feature",
            ))
        }
    }
}

pub type MainAutoBackend = burn::backend::Autodiff<MainBackend>;
impl MainDevice for MainAutoBackend {
    fn main_device(use_accelerator: bool) -> Result<<Self as Backend>::Device> {
        <<Self as AutodiffBackend>::InnerBackend as MainDevice>::main_device(use_accelerator)
    }
}

#[cfg(not(feature = "_has-backend"))]
mod err {
    use super::*;
    std::compile_error!(
        "No backend selected. Enable one of the `ndarray`, `tch-cpu`, `tch-gpu`, `wgpu` or `cuda` features."
    );

    // pretend to fallback to ndarray (to avoid too many other unrelated errors)
    pub type MainBackend = burn::backend::NdArray<Element, i32>;
    impl MainDevice for MainBackend {}
}
#[cfg(not(feature = "_has-backend"))]
pub use err::*;
