use std::{
    fs::{self, File},
    io::{ErrorKind, Read, Write},
    path::{Path, PathBuf},
};

use log::{info, warn};

/// Builds the deterministic spill file name for one evicted page. The
/// sequence number makes names unique even when the same page is evicted
/// more than once over a run.
pub fn spill_name(pid: usize, page_number: usize, sequence: u64) -> String {
    format!("page_{}_{}_{}", pid, page_number, sequence)
}

/// The on-disk swap area holding the contents of pages evicted from
/// physical frames. Files live under a dedicated directory which is created
/// on startup and removed wholesale on shutdown.
pub struct BackingStore {
    dir: PathBuf,
}

impl BackingStore {
    pub fn init(dir: impl Into<PathBuf>) -> Result<Self, std::io::Error> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        info!("Backing store ready at {:?}", dir);
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_of(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    /// Writes the full contents of a frame to a new spill file.
    pub fn spill(&self, filename: &str, data: &[u8]) -> Result<(), std::io::Error> {
        let path = self.path_of(filename);
        info!("Start writing {} bytes to {:?}", data.len(), path);
        let mut file = File::create(&path)?;
        file.write_all(data)?;
        info!("Done writing {:?}", path);
        Ok(())
    }

    /// Reads a spill file back into a frame buffer. A short read zero-fills
    /// the remainder of the buffer and is reported as a warning; the number
    /// of bytes actually read is returned.
    pub fn restore(&self, filename: &str, buf: &mut [u8]) -> Result<usize, std::io::Error> {
        let path = self.path_of(filename);
        info!("Start reading {:?}", path);
        let mut file = File::open(&path)?;
        let mut read = 0;
        while read < buf.len() {
            match file.read(&mut buf[read..])? {
                0 => break,
                n => read += n,
            }
        }
        if read < buf.len() {
            warn!(
                "Incomplete read from {:?}: expected {} bytes, got {}; zero-filling the rest",
                path,
                buf.len(),
                read
            );
            buf[read..].fill(0);
        }
        info!("Done reading {:?}", path);
        Ok(read)
    }

    pub fn remove(&self, filename: &str) -> Result<(), std::io::Error> {
        fs::remove_file(self.path_of(filename))
    }

    /// Lists the spill files currently on disk as (name, size) pairs.
    pub fn files(&self) -> Result<Vec<(String, u64)>, std::io::Error> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push((
                    entry.file_name().to_string_lossy().into_owned(),
                    entry.metadata()?.len(),
                ));
            }
        }
        files.sort();
        Ok(files)
    }

    /// Removes the whole swap directory. Called at shutdown once every
    /// process has been torn down.
    pub fn purge(&self) -> Result<(), std::io::Error> {
        match fs::remove_dir_all(&self.dir) {
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            result => result,
        }
    }
}

impl Drop for BackingStore {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.dir);
    }
}
