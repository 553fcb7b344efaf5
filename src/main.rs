use anyhow::{Context, Result};
use nmnist_aug::backend::MainAutoBackend;
use nmnist_aug::cli::{AppArgs, HELP};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("nmnist_aug=info".parse()?),
        )
        .init();

    let args = match AppArgs::parse() {
        Ok(args) => args,
        Err(err) => {
            eprintln!("{HELP}");
            return Err(err.into());
        }
    };

    let state = nmnist_aug::launch::<MainAutoBackend>(&args)
        .with_context(|| format!("experiment {:?} failed", args.name))?;
    tracing::info!("Done after {} epochs", state.epoch);
    Ok(())
}
