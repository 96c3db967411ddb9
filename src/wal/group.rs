/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A log file that is split into numbered segments as it grows.
//!
//! The group writes to a "head" file at `head_path`. When the head grows past the head size limit, it
//! is renamed to `<head_path>.NNN` (with `NNN` counting up from `000`) and a fresh head is started. A
//! [`GroupReader`] reads the segments and the head back as one continuous stream.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

pub struct Group {
    head_path: PathBuf,
    head: File,
    head_size: u64,
    head_size_limit: u64,
    /// Oldest segments are removed while the group's total size exceeds this. Zero means no limit.
    total_size_limit: u64,
    /// Index of the oldest segment still on disk.
    min_index: u32,
    /// Index that the head will get when it is rotated.
    max_index: u32,
}

impl Group {
    pub fn open(head_path: impl AsRef<Path>, head_size_limit: u64, total_size_limit: u64) -> io::Result<Group> {
        let head_path = head_path.as_ref().to_path_buf();
        if let Some(dir) = head_path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let head = OpenOptions::new().create(true).append(true).open(&head_path)?;
        let head_size = head.metadata()?.len();

        let indices = segment_indices(&head_path)?;
        let min_index = indices.first().copied().unwrap_or(0);
        let max_index = indices.last().map(|max| max + 1).unwrap_or(0);

        Ok(Group {
            head_path,
            head,
            head_size,
            head_size_limit,
            total_size_limit,
            min_index,
            max_index,
        })
    }

    pub fn head_path(&self) -> &Path {
        &self.head_path
    }

    pub fn head_size(&self) -> u64 {
        self.head_size
    }

    pub fn min_index(&self) -> u32 {
        self.min_index
    }

    /// The index of the head. Rotated segments have indices `min_index..max_index`.
    pub fn max_index(&self) -> u32 {
        self.max_index
    }

    /// Whether nothing was ever written to the group.
    pub fn is_empty(&self) -> bool {
        self.head_size == 0 && self.min_index == self.max_index
    }

    /// Flush written data and wait until it reaches the disk.
    pub fn sync(&mut self) -> io::Result<()> {
        self.head.flush()?;
        self.head.sync_all()
    }

    /// Rotate the head if it has reached the head size limit.
    pub fn maybe_rotate(&mut self) -> io::Result<()> {
        if self.head_size_limit > 0 && self.head_size >= self.head_size_limit {
            self.rotate()?;
        }
        Ok(())
    }

    /// Close the head as segment `max_index` and start a new, empty head.
    pub fn rotate(&mut self) -> io::Result<()> {
        self.sync()?;
        let segment = segment_path(&self.head_path, self.max_index);
        fs::rename(&self.head_path, &segment)?;
        self.head = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.head_path)?;
        self.head_size = 0;
        self.max_index += 1;
        log::debug!("Rotated WAL head to {}", segment.display());

        self.enforce_total_size_limit()
    }

    fn enforce_total_size_limit(&mut self) -> io::Result<()> {
        if self.total_size_limit == 0 {
            return Ok(());
        }
        let mut total = self.head_size;
        for index in self.min_index..self.max_index {
            total += fs::metadata(segment_path(&self.head_path, index))
                .map(|metadata| metadata.len())
                .unwrap_or(0);
        }
        while total > self.total_size_limit && self.min_index < self.max_index {
            let oldest = segment_path(&self.head_path, self.min_index);
            let size = fs::metadata(&oldest).map(|metadata| metadata.len()).unwrap_or(0);
            fs::remove_file(&oldest)?;
            log::info!("Removed WAL segment {} to stay within the size limit", oldest.display());
            total = total.saturating_sub(size);
            self.min_index += 1;
        }
        Ok(())
    }

    /// A reader that starts at the beginning of segment `index` and continues through the head.
    pub fn new_reader(&self, index: u32) -> GroupReader {
        GroupReader {
            head_path: self.head_path.clone(),
            max_index: self.max_index,
            index,
            current: None,
        }
    }
}

impl Write for Group {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.head.write(buf)?;
        self.head_size += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.head.flush()
    }
}

/// Reads the segments of a [`Group`] in order, followed by its head.
pub struct GroupReader {
    head_path: PathBuf,
    max_index: u32,
    index: u32,
    current: Option<File>,
}

impl GroupReader {
    fn path_of(&self, index: u32) -> PathBuf {
        if index >= self.max_index {
            self.head_path.clone()
        } else {
            segment_path(&self.head_path, index)
        }
    }
}

impl Read for GroupReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.current.is_none() {
                if self.index > self.max_index {
                    return Ok(0);
                }
                match File::open(self.path_of(self.index)) {
                    Ok(file) => self.current = Some(file),
                    Err(err) if err.kind() == io::ErrorKind::NotFound && self.index < self.max_index => {
                        self.index += 1;
                        continue;
                    }
                    Err(err) => return Err(err),
                }
            }

            let Some(file) = self.current.as_mut() else {
                return Ok(0);
            };
            let n = file.read(buf)?;
            if n > 0 || buf.is_empty() {
                return Ok(n);
            }
            if self.index >= self.max_index {
                return Ok(0);
            }
            self.current = None;
            self.index += 1;
        }
    }
}

fn segment_path(head_path: &Path, index: u32) -> PathBuf {
    let mut path = head_path.as_os_str().to_owned();
    path.push(format!(".{:03}", index));
    PathBuf::from(path)
}

// Indices of the rotated segments next to `head_path`, in ascending order.
fn segment_indices(head_path: &Path) -> io::Result<Vec<u32>> {
    let Some(file_name) = head_path.file_name().and_then(|name| name.to_str()) else {
        return Ok(Vec::new());
    };
    let dir = match head_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let prefix = format!("{}.", file_name);

    let mut indices = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(suffix) = name.strip_prefix(&prefix) {
            if let Ok(index) = suffix.parse::<u32>() {
                indices.push(index);
            }
        }
    }
    indices.sort_unstable();
    Ok(indices)
}
