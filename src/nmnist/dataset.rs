use crate::error::{Error, Result};
use crate::event::{Event, EventSample};
use burn::data::dataset::{
    Dataset, InMemDataset,
    transform::{Mapper, MapperDataset},
};
use burn_common::network::downloader::download_file_as_bytes;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use zip::ZipArchive;

// Dropbox mirror of the N-MNIST release (Orchard et al., 2015).
const TRAIN_URL: &str =
    "https://www.dropbox.com/sh/tg2ljlbmtzygrag/AABlMOuR15ugeOxMCX0Pvoxga/Train.zip?dl=1";
const TEST_URL: &str =
    "https://www.dropbox.com/sh/tg2ljlbmtzygrag/AADSKgJ2CjaBWh75HnTNZyhca/Test.zip?dl=1";

/// Each event is packed into 40 bits.
pub const EVENT_BYTES: usize = 5;

/// Rows with this value mark a timestamp overflow rather than an event.
const OVERFLOW_Y: u8 = 240;
/// Timestamp increment carried by an overflow marker.
const OVERFLOW_INCREMENT: u64 = 1 << 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

impl Split {
    pub fn dir_name(&self) -> &'static str {
        match self {
            Split::Train => "Train",
            Split::Test => "Test",
        }
    }

    fn url(&self) -> &'static str {
        match self {
            Split::Train => TRAIN_URL,
            Split::Test => TEST_URL,
        }
    }
}

impl std::fmt::Display for Split {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

#[derive(Debug, Clone)]
struct RecordingRaw {
    /// Already validated and truncated, see [`truncated_len`].
    pub bytes: Vec<u8>,
    pub label: u8,
}

struct BytesToEvents;

impl Mapper<RecordingRaw, EventSample> for BytesToEvents {
    fn map(&self, item: &RecordingRaw) -> EventSample {
        EventSample {
            events: decode_events(&item.bytes),
            label: item.label,
        }
    }
}

type MappedDataset = MapperDataset<InMemDataset<RecordingRaw>, BytesToEvents, RecordingRaw>;

/// The N-MNIST dataset: MNIST digits recorded by an ATIS event camera performing
/// three saccades. There are 60,000 training and 10,000 test recordings.
///
/// Recordings are kept in memory in their packed form and decoded on access.
pub struct NmnistDataset {
    dataset: MappedDataset,
}

impl Dataset<EventSample> for NmnistDataset {
    fn get(&self, index: usize) -> Option<EventSample> {
        self.dataset.get(index)
    }

    fn len(&self) -> usize {
        self.dataset.len()
    }
}

impl NmnistDataset {
    /// Opens a split stored under `<root>/nmnist/<Train|Test>/<digit>/*.bin`.
    ///
    /// When the split is missing it is downloaded if `download` is set, otherwise this fails.
    /// `num_events` keeps at most that many leading events of each recording.
    pub fn new(root: &Path, split: Split, download: bool, num_events: Option<usize>) -> Result<Self> {
        let split_dir = Self::split_dir(root, split);
        if !split_dir.exists() {
            if !download {
                return Err(Error::DatasetMissing { path: split_dir });
            }
            Self::download(root, split)?;
        }

        let items = Self::read_recordings(&split_dir, num_events)?;
        tracing::info!("loaded {} {split} recordings from {split_dir:?}", items.len());

        let dataset = InMemDataset::new(items);
        let dataset = MapperDataset::new(dataset, BytesToEvents);
        Ok(Self { dataset })
    }

    pub fn train(root: &Path, download: bool, num_events: Option<usize>) -> Result<Self> {
        Self::new(root, Split::Train, download, num_events)
    }

    pub fn test(root: &Path, download: bool, num_events: Option<usize>) -> Result<Self> {
        Self::new(root, Split::Test, download, num_events)
    }

    fn split_dir(root: &Path, split: Split) -> PathBuf {
        root.join("nmnist").join(split.dir_name())
    }

    /// Downloads the split archive and extracts it under `<root>/nmnist`.
    fn download(root: &Path, split: Split) -> Result<()> {
        let dest_dir = root.join("nmnist");
        fs::create_dir_all(&dest_dir).map_err(Error::io(&dest_dir))?;

        let name = format!("{split}.zip");
        let bytes = download_file_as_bytes(split.url(), &name);
        tracing::info!("extracting {name} into {dest_dir:?}");
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        archive.extract(&dest_dir)?;
        Ok(())
    }

    /// Reads every `<digit>/*.bin` recording, in label then file name order.
    fn read_recordings(split_dir: &Path, num_events: Option<usize>) -> Result<Vec<RecordingRaw>> {
        let mut items = Vec::new();
        for label in 0..10u8 {
            let label_dir = split_dir.join(label.to_string());
            if !label_dir.exists() {
                continue;
            }
            let mut paths: Vec<PathBuf> = fs::read_dir(&label_dir)
                .map_err(Error::io(&label_dir))?
                .filter_map(|entry| entry.ok().map(|entry| entry.path()))
                .filter(|path| path.extension().is_some_and(|ext| ext == "bin"))
                .collect();
            paths.sort();

            for path in paths {
                let mut bytes = fs::read(&path).map_err(Error::io(&path))?;
                if bytes.len() % EVENT_BYTES != 0 {
                    return Err(Error::MalformedRecording {
                        reason: format!(
                            "length {} is not a multiple of {EVENT_BYTES}",
                            bytes.len()
                        ),
                        path,
                    });
                }
                if let Some(num_events) = num_events {
                    bytes.truncate(truncated_len(&bytes, num_events));
                }
                items.push(RecordingRaw { bytes, label });
            }
        }
        Ok(items)
    }
}

/// Byte length covering the first `num_events` events, overflow markers included.
pub fn truncated_len(bytes: &[u8], num_events: usize) -> usize {
    let mut events = 0;
    for (i, chunk) in bytes.chunks_exact(EVENT_BYTES).enumerate() {
        if chunk[1] == OVERFLOW_Y {
            continue;
        }
        if events == num_events {
            return i * EVENT_BYTES;
        }
        events += 1;
    }
    bytes.len() - bytes.len() % EVENT_BYTES
}

/// Decodes a packed N-MNIST recording.
///
/// Every event is 40 bits, big-endian:
/// `x` (8 bits), `y` (8 bits), polarity (1 bit), timestamp in microseconds (23 bits).
/// Events whose `y` is 240 are overflow markers advancing all subsequent timestamps by 2^13.
/// A trailing partial event is ignored.
pub fn decode_events(bytes: &[u8]) -> Vec<Event> {
    let mut overflow = 0u64;
    let mut events = Vec::with_capacity(bytes.len() / EVENT_BYTES);
    for chunk in bytes.chunks_exact(EVENT_BYTES) {
        let [x, y, b2, b3, b4] = [chunk[0], chunk[1], chunk[2], chunk[3], chunk[4]];
        if y == OVERFLOW_Y {
            overflow += OVERFLOW_INCREMENT;
            continue;
        }
        let polarity = b2 & 0x80 != 0;
        let timestamp = (((b2 & 0x7f) as u64) << 16) | ((b3 as u64) << 8) | b4 as u64;
        events.push(Event::new(
            x as u16,
            y as u16,
            (timestamp + overflow) as f64,
            polarity,
        ));
    }
    events
}
