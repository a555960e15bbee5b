use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::info;

use super::engine::MessageListener;
use crate::xml::Location;

/// Appends `systemId:line:column: code: text` lines to a file.
pub struct LineMessageListener {
    path: PathBuf,
    out: BufWriter<File>,
    count: usize,
    failure: Option<io::Error>,
}

impl LineMessageListener {
    pub fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            out: BufWriter::new(File::create(path)?),
            count: 0,
            failure: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn finish(mut self) -> io::Result<usize> {
        if let Some(e) = self.failure.take() {
            return Err(e);
        }
        self.out.flush()?;
        Ok(self.count)
    }
}

impl MessageListener for LineMessageListener {
    fn message(&mut self, location: &Location, code: &str, text: &str) {
        let line = format!("{location}: {code}: {text}");
        info!("{line}");
        self.count += 1;
        if let Err(e) = writeln!(self.out, "{line}")
            && self.failure.is_none()
        {
            self.failure = Some(e);
        }
    }
}
