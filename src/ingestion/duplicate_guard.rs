//! At most one catalog entry per content hash.
//!
//! The lookup in [`DuplicateGuard::check`] is only a fast path. The unique
//! constraint on `photos.content_hash` decides, and [`DuplicateGuard::commit`]
//! turns a constraint violation into the same outcome the fast path reports.
//!
//! Work on the file behind a stored location (placing it, committing it and
//! removing it after a failed commit) is serialized with
//! [`DuplicateGuard::lock_location`].

use crate::photo_store::{InsertPhotoError, NewPhoto, Photo, PhotoStore};
use anyhow::{anyhow, Result};
use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex};
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DuplicateCheck {
    Proceed,
    Duplicate(Photo),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed(Photo),
    Duplicate(Photo),
}

#[derive(Default)]
struct BusyLocations {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

/// Exclusive hold on one stored location, released on drop.
pub struct LocationLock {
    busy: Arc<BusyLocations>,
    location: String,
}

impl Drop for LocationLock {
    fn drop(&mut self) {
        self.busy.held.lock().unwrap().remove(&self.location);
        self.busy.released.notify_all();
    }
}

#[derive(Clone)]
pub struct DuplicateGuard {
    store: Arc<dyn PhotoStore>,
    busy: Arc<BusyLocations>,
}

impl DuplicateGuard {
    pub fn new(store: Arc<dyn PhotoStore>) -> Self {
        Self {
            store,
            busy: Arc::new(BusyLocations::default()),
        }
    }

    pub fn store(&self) -> &Arc<dyn PhotoStore> {
        &self.store
    }

    /// Wait until no one else holds `location`, then hold it. Blocking.
    pub fn lock_location(&self, location: &str) -> LocationLock {
        let mut held = self.busy.held.lock().unwrap();
        while held.contains(location) {
            held = self.busy.released.wait(held).unwrap();
        }
        held.insert(location.to_string());
        LocationLock {
            busy: self.busy.clone(),
            location: location.to_string(),
        }
    }

    /// Blocking.
    pub fn check(&self, content_hash: &str) -> Result<DuplicateCheck> {
        Ok(match self.store.find_by_hash(content_hash)? {
            Some(existing) => DuplicateCheck::Duplicate(existing),
            None => DuplicateCheck::Proceed,
        })
    }

    /// Insert `photo`, reporting a lost race on either unique column as a duplicate
    /// of the entry that won it. Blocking.
    pub fn commit(&self, photo: &NewPhoto) -> Result<CommitOutcome> {
        let existing = match self.store.insert_photo(photo) {
            Ok(committed) => return Ok(CommitOutcome::Committed(committed)),
            Err(InsertPhotoError::DuplicateHash(hash)) => {
                debug!("Commit lost the race for content hash {}", hash);
                self.store.find_by_hash(&hash)?
            }
            // Locations are derived from the hash, so an occupied location
            // means the same content was cataloged under it.
            Err(InsertPhotoError::DuplicateLocation(location)) => {
                debug!("Commit lost the race for location {}", location);
                self.store.find_by_location(&location)?
            }
            Err(InsertPhotoError::Other(e)) => return Err(e),
        };

        existing.map(CommitOutcome::Duplicate).ok_or_else(|| {
            anyhow!(
                "Unique constraint violated for {} but no conflicting entry was found",
                photo.content_hash
            )
        })
    }
}
