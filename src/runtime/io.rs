use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

const VALUE_SIZE: usize = std::mem::size_of::<f64>();

/// Random-access file of fixed-stride `f64` records, one record per step
///
/// The record buffer is allocated once in [SequenceFile::open]; reading and
/// writing records afterwards never allocates.
#[derive(Debug)]
pub struct SequenceFile {
    file: File,
    buffer: Vec<u8>,
}

impl SequenceFile {
    /// Open `path` for records of `values` elements, positioned at record `idx`
    ///
    /// Missing files are created, existing files are never truncated.
    pub fn open(path: impl AsRef<Path>, idx: usize, values: usize) -> io::Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let record_size = values * VALUE_SIZE;
        file.seek(SeekFrom::Start((idx * record_size) as u64))?;
        Ok(Self {
            file,
            buffer: vec![0; record_size],
        })
    }

    /// Number of values per record
    pub fn values(&self) -> usize {
        self.buffer.len() / VALUE_SIZE
    }

    pub fn read_scalar(&mut self) -> io::Result<f64> {
        let mut bytes = [0; VALUE_SIZE];
        self.file.read_exact(&mut bytes)?;
        Ok(f64::from_ne_bytes(bytes))
    }

    /// Read one record into `targets`, in logical element order
    pub fn read_into<'a>(&mut self, targets: impl IntoIterator<Item = &'a mut f64>) -> io::Result<()> {
        self.file.read_exact(&mut self.buffer)?;
        for (target, chunk) in targets.into_iter().zip(self.buffer.chunks_exact(VALUE_SIZE)) {
            let mut bytes = [0; VALUE_SIZE];
            bytes.copy_from_slice(chunk);
            *target = f64::from_ne_bytes(bytes);
        }
        Ok(())
    }

    pub fn write_scalar(&mut self, value: f64) -> io::Result<()> {
        self.file.write_all(&value.to_ne_bytes())
    }

    /// Write one record from `sources`, in logical element order
    pub fn write_from<'a>(&mut self, sources: impl IntoIterator<Item = &'a f64>) -> io::Result<()> {
        for (source, chunk) in sources.into_iter().zip(self.buffer.chunks_exact_mut(VALUE_SIZE)) {
            chunk.copy_from_slice(&source.to_ne_bytes());
        }
        self.file.write_all(&self.buffer)
    }

    /// Flush and release the file handle
    pub fn close(mut self) -> io::Result<()> {
        self.file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;

    #[test]
    fn test_scalar_records_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q.bin");

        let mut file = SequenceFile::open(&path, 0, 1).unwrap();
        for value in [1.5, -2.0, 3.25] {
            file.write_scalar(value).unwrap();
        }
        file.close().unwrap();

        let mut file = SequenceFile::open(&path, 0, 1).unwrap();
        assert_eq!(file.read_scalar().unwrap(), 1.5);
        assert_eq!(file.read_scalar().unwrap(), -2.0);
        assert_eq!(file.read_scalar().unwrap(), 3.25);
        assert!(file.read_scalar().is_err());
    }

    #[test]
    fn test_open_seeks_to_step() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sm.bin");

        let mut file = SequenceFile::open(&path, 0, 2).unwrap();
        for step in 0..4 {
            let record = Array1::from(vec![step as f64, 10.0 * step as f64]);
            file.write_from(record.iter()).unwrap();
        }
        file.close().unwrap();

        let mut file = SequenceFile::open(&path, 2, 2).unwrap();
        assert_eq!(file.values(), 2);
        let mut target = Array1::<f64>::zeros(2);
        file.read_into(target.iter_mut()).unwrap();
        assert_eq!(target.to_vec(), vec![2.0, 20.0]);
    }
}
