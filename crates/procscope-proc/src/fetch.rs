//! Growable-buffer kernel table fetch.
//!
//! The size of a kernel table (the process list, one process descriptor, an
//! argument blob) is only known by asking. We probe with an empty buffer,
//! allocate what the kernel asked for, and ask again. The table can grow
//! between the two calls, so keep going until the answer fits.

use std::io;

/// A kernel table that can be read into a caller-supplied buffer.
pub(crate) trait TableQuery {
    /// Query the table.
    ///
    /// `buf` is `None` for a size probe. Returns the number of bytes the
    /// kernel holds (or wrote). A value larger than `buf.len()` means the
    /// buffer was too small.
    fn query(&mut self, buf: Option<&mut [u8]>) -> io::Result<usize>;
}

/// Read an entire kernel table, growing the buffer until it fits.
///
/// The returned buffer is trimmed to the size the kernel reported.
pub(crate) fn fetch_table<Q: TableQuery>(query: &mut Q) -> io::Result<Vec<u8>> {
    let mut data: Vec<u8> = Vec::new();

    loop {
        let size = if data.is_empty() {
            query.query(None)?
        } else {
            query.query(Some(&mut data))?
        };

        if size > data.len() {
            data = vec![0u8; size];
            continue;
        }

        data.truncate(size);
        return Ok(data);
    }
}
