//! Integer-status entry points for a user-program boundary. Every failure is
//! logged and collapsed into the status value; nothing here returns an error.

use log::warn;

use crate::fs::{FileSystem, OpenFileId};
use crate::io::BlockStorage;

/// Returns 1 on success, 0 on failure.
pub fn sys_create<T: BlockStorage>(fs: &mut FileSystem<T>, name: &str, size: usize) -> i32 {
    match fs.create(name, size) {
        Ok(()) => 1,
        Err(e) => {
            warn!("create {} failed: {}", name, e);
            0
        }
    }
}

/// Returns the id of the new table entry, or 0 when the file cannot be opened.
pub fn sys_open<T: BlockStorage>(fs: &mut FileSystem<T>, name: &str) -> OpenFileId {
    fs.open_a_file(name).unwrap_or_else(|e| {
        warn!("open {} failed: {}", name, e);
        0
    })
}

/// Returns the bytes read, or -1.
pub fn sys_read<T: BlockStorage>(fs: &mut FileSystem<T>, buf: &mut [u8], id: OpenFileId) -> i32 {
    match fs.read(id, buf) {
        Ok(n) => n as i32,
        Err(e) => {
            warn!("read from file {} failed: {}", id, e);
            -1
        }
    }
}

/// Returns the bytes written, or -1.
pub fn sys_write<T: BlockStorage>(fs: &mut FileSystem<T>, buf: &[u8], id: OpenFileId) -> i32 {
    match fs.write(id, buf) {
        Ok(n) => n as i32,
        Err(e) => {
            warn!("write to file {} failed: {}", id, e);
            -1
        }
    }
}

pub fn sys_close<T: BlockStorage>(fs: &mut FileSystem<T>, id: OpenFileId) -> i32 {
    match fs.close(id) {
        Ok(()) => 1,
        Err(e) => {
            warn!("close of file {} failed: {}", id, e);
            0
        }
    }
}

pub fn sys_remove<T: BlockStorage>(fs: &mut FileSystem<T>, name: &str) -> i32 {
    match fs.remove(name) {
        Ok(()) => 1,
        Err(e) => {
            warn!("remove {} failed: {}", name, e);
            0
        }
    }
}
