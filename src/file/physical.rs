//! Physical file backend for memory-mapped I/O.
//!
//! This module provides the [`crate::file::physical::Physical`] backend that implements the
//! [`crate::file::Backend`] trait for accessing the generator executable from disk using
//! memory-mapped I/O. The image is typically consulted in a non-sequential pattern while
//! walking headers, section tables, and the export directory, which mapping serves well
//! without loading the whole file upfront.
//!
//! All access operations include bounds checking to ensure memory safety.

use super::Backend;
use crate::{
    Error::{FileError, Other},
    Result,
};

use memmap2::Mmap;
use std::{fs, path::Path};

/// A file backend that uses memory-mapped I/O for efficient access to files on disk.
///
/// [`crate::file::physical::Physical`] maps the generator executable directly into the
/// process's virtual address space. The mapping is read-only and shared; the operating system
/// manages paging, so only the touched portions occupy physical memory.
///
/// # Examples
///
/// ```rust,ignore
/// use terrabridge::file::{Physical, Backend};
/// use std::path::Path;
///
/// let physical = Physical::new(Path::new("worldgen.dll"))?;
/// let dos_header = physical.data_slice(0, 2)?;
/// assert_eq!(dos_header, b"MZ");
/// # Ok::<(), terrabridge::Error>(())
/// ```
#[derive(Debug)]
pub struct Physical {
    /// Memory-mapped file data
    data: Mmap,
}

impl Physical {
    /// Create a new physical file backend by memory-mapping the specified file.
    ///
    /// # Arguments
    /// * `path` - Path to the executable image on disk
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened or
    /// [`crate::Error::Other`] if memory mapping fails.
    pub fn new(path: impl AsRef<Path>) -> Result<Physical> {
        let file = match fs::File::open(path) {
            Ok(file) => file,
            Err(error) => return Err(FileError(error)),
        };

        let mmap = match unsafe { Mmap::map(&file) } {
            Ok(mmap) => mmap,
            Err(error) => return Err(Other(error.to_string())),
        };

        Ok(Physical { data: mmap })
    }
}

impl Backend for Physical {
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let Some(offset_end) = offset.checked_add(len) else {
            return Err(out_of_bounds_error!());
        };

        if offset_end > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        Ok(&self.data[offset..offset_end])
    }

    fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str, content: &[u8]) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn physical_maps_file() {
        let path = temp_file("terrabridge_physical.bin", b"MZ\x90\x00payload");
        let physical = Physical::new(&path).unwrap();

        assert_eq!(physical.len(), 11);
        assert_eq!(physical.data()[0], 0x4D);
        assert_eq!(physical.data()[1], 0x5A);
        assert_eq!(physical.data_slice(4, 7).unwrap(), b"payload");

        assert!(physical
            .data_slice(u32::MAX as usize, u32::MAX as usize)
            .is_err());
        assert!(physical.data_slice(0, 4 * 1024 * 1024).is_err());

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn physical_invalid_file_path() {
        let result = Physical::new("/nonexistent/path/to/worldgen.dll");
        assert!(result.is_err());
        match result.unwrap_err() {
            FileError(io_error) => {
                assert_eq!(io_error.kind(), std::io::ErrorKind::NotFound);
            }
            _ => panic!("Expected FileError"),
        }
    }

    #[test]
    fn physical_boundary_conditions() {
        let path = temp_file("terrabridge_physical_bounds.bin", &[0xAA; 64]);
        let physical = Physical::new(&path).unwrap();

        let len = physical.len();
        assert_eq!(physical.data_slice(len - 1, 1).unwrap().len(), 1);
        assert_eq!(physical.data_slice(0, len).unwrap().len(), len);
        assert_eq!(physical.data_slice(len, 0).unwrap().len(), 0);

        assert!(physical.data_slice(usize::MAX, 1).is_err());
        assert!(physical.data_slice(len, 1).is_err());
        assert!(physical.data_slice(len - 1, 2).is_err());

        std::fs::remove_file(&path).unwrap();
    }
}
