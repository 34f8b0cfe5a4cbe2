use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::hits::HitRecord;

const HIT_FRAMES_KEY: &str = "frame_nums_with_ball_hits";
const KNOWN_POSITIONS_KEY: &str = "known_ball_positions";

/// Opaque keyed blob storage.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error>;
    fn put(&mut self, key: &str, value: Vec<u8>) -> Result<(), Error>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for &mut S {
    #[inline]
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        (**self).get(key)
    }

    #[inline]
    fn put(&mut self, key: &str, value: Vec<u8>) -> Result<(), Error> {
        (**self).put(key, value)
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: HashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.entries.get(key).cloned())
    }

    fn put(&mut self, key: &str, value: Vec<u8>) -> Result<(), Error> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }
}

/// One file per key below `root`; `/` in a key becomes a subdirectory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();

        for segment in key.split('/').filter(|s| !s.is_empty() && *s != "..") {
            let clean: String = segment
                .chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                        c
                    } else {
                        '_'
                    }
                })
                .collect();
            path.push(clean);
        }

        path.set_extension("json");
        path
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn put(&mut self, key: &str, value: Vec<u8>) -> Result<(), Error> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, value)?;
        Ok(())
    }
}

/// Hit-event results of one video, stored as two blobs under its own key.
#[derive(Debug, Clone)]
pub struct HitCache<S: KeyValueStore> {
    store: S,
    video_key: String,
}

impl<S: KeyValueStore> HitCache<S> {
    pub fn new(store: S, video_key: &str) -> Self {
        Self {
            store,
            video_key: video_key.to_string(),
        }
    }

    #[inline]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[inline]
    pub fn into_store(self) -> S {
        self.store
    }

    fn key(&self, name: &str) -> String {
        format!("{}/{}", self.video_key, name)
    }

    /// A missing or unreadable entry means the record has to be recomputed.
    pub fn load(&self) -> Option<HitRecord> {
        let frames = self.load_blob(HIT_FRAMES_KEY)?;
        let known_positions = self.load_blob(KNOWN_POSITIONS_KEY)?;

        Some(HitRecord {
            frames,
            known_positions,
        })
    }

    fn load_blob<T: serde::de::DeserializeOwned>(&self, name: &str) -> Option<T> {
        let key = self.key(name);

        match self.store.get(&key) {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(value) => Some(value),
                Err(err) => {
                    log::warn!("discarding corrupt cache entry {}: {}", key, err);
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                log::warn!("cache entry {} unreadable: {}", key, err);
                None
            }
        }
    }

    pub fn save(&mut self, record: &HitRecord) -> Result<(), Error> {
        let frames = serde_json::to_vec(&record.frames)?;
        let known = serde_json::to_vec(&record.known_positions)?;

        let frames_key = self.key(HIT_FRAMES_KEY);
        let known_key = self.key(KNOWN_POSITIONS_KEY);

        self.store.put(&frames_key, frames)?;
        self.store.put(&known_key, known)?;

        Ok(())
    }
}
