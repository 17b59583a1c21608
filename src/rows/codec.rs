/*
 * SPDX-FileCopyrightText: 2025 The oblix authors
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use crate::consts::{BLOCK_HEADER_SIZE, MAX_BLOCK_SIZE};
use crate::error::{KernelError, KernelResult};

/// Reads a little-endian `u32` at `pos`, length-checked.
pub fn read_u32_at(buf: &[u8], pos: usize) -> KernelResult<u32> {
    let end = pos
        .checked_add(4)
        .ok_or(KernelError::MalformedRow("length field out of range"))?;
    if buf.len() < end {
        return Err(KernelError::MalformedRow("length field truncated"));
    }
    Ok(u32::from_le_bytes(buf[pos..end].try_into().unwrap()))
}

/// Reads the leading column count of a bare row.
pub fn num_cols(row: &[u8]) -> KernelResult<u32> {
    read_u32_at(row, 0)
}

/// Total serialized size of the bare row at the front of `buf`:
/// `[num_cols u32][enc_len u32, enc_bytes] × num_cols`.
pub fn bare_row_len(buf: &[u8]) -> KernelResult<usize> {
    let cols = num_cols(buf)?;
    let mut pos = 4usize;
    for _ in 0..cols {
        let len = read_u32_at(buf, pos)? as usize;
        pos = pos
            .checked_add(4 + len)
            .ok_or(KernelError::MalformedRow("attribute length overflow"))?;
        if pos > buf.len() {
            return Err(KernelError::MalformedRow("row body truncated"));
        }
    }
    Ok(pos)
}

/// Returns the ciphertext of the `idx`-th attribute (1-based) of a bare
/// row.
pub fn attribute_at(row: &[u8], idx: u32) -> KernelResult<&[u8]> {
    let cols = num_cols(row)?;
    if idx == 0 || idx > cols {
        return Err(KernelError::IndexOutOfRange { idx, num_cols: cols });
    }
    let mut pos = 4usize;
    for i in 1..=cols {
        let len = read_u32_at(row, pos)? as usize;
        if row.len() < pos + 4 + len {
            return Err(KernelError::MalformedRow("row body truncated"));
        }
        if i == idx {
            return Ok(&row[pos + 4..pos + 4 + len]);
        }
        pos += 4 + len;
    }
    unreachable!("attribute index validated against column count")
}

/// Header of a row block: payload length, row count, row upper bound.
#[derive(Debug, Clone, Copy)]
pub struct BlockHeader {
    pub block_len: u32,
    pub num_rows: u32,
    pub row_upper_bound: u32,
}

/// Iterates over the blocks of a run.
pub struct BlockReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BlockReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        BlockReader { data, pos: 0 }
    }

    /// Returns the next block header and payload, or `None` at the end
    /// of the run.
    pub fn next_block(&mut self) -> KernelResult<Option<(BlockHeader, &'a [u8])>> {
        if self.pos == self.data.len() {
            return Ok(None);
        }
        if self.data.len() < self.pos + BLOCK_HEADER_SIZE {
            return Err(KernelError::MalformedRow("block header truncated"));
        }
        let header = BlockHeader {
            block_len: read_u32_at(self.data, self.pos)?,
            num_rows: read_u32_at(self.data, self.pos + 4)?,
            row_upper_bound: read_u32_at(self.data, self.pos + 8)?,
        };
        let start = self.pos + BLOCK_HEADER_SIZE;
        let end = start + header.block_len as usize;
        if self.data.len() < end {
            return Err(KernelError::MalformedRow("block payload truncated"));
        }
        self.pos = end;
        Ok(Some((header, &self.data[start..end])))
    }
}

/// A lazy, restartable reader over the rows of a run.
///
/// The reader consumes blocks transparently; the end of the slice is the
/// end of the run, so a sub-slice restarts reading at any block-aligned
/// offset.
pub struct RowReader<'a> {
    blocks: BlockReader<'a>,
    block: &'a [u8],
    block_pos: usize,
    rows_left: u32,
    row_upper_bound: u32,
}

impl<'a> RowReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        RowReader {
            blocks: BlockReader::new(data),
            block: &[],
            block_pos: 0,
            rows_left: 0,
            row_upper_bound: 0,
        }
    }

    /// The row upper bound declared by the last block header read, or 0
    /// before the first row.
    pub fn row_upper_bound(&self) -> u32 {
        self.row_upper_bound
    }

    /// Returns true if another row is available.
    pub fn has_next(&mut self) -> KernelResult<bool> {
        while self.rows_left == 0 {
            match self.blocks.next_block()? {
                Some((header, payload)) => {
                    self.block = payload;
                    self.block_pos = 0;
                    self.rows_left = header.num_rows;
                    self.row_upper_bound = header.row_upper_bound;
                }
                None => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Returns the next bare-framed encrypted row.
    pub fn next_row(&mut self) -> KernelResult<&'a [u8]> {
        if !self.has_next()? {
            return Err(KernelError::MalformedRow("read past the end of a run"));
        }
        let rest = &self.block[self.block_pos..];
        let len = bare_row_len(rest)?;
        self.block_pos += len;
        self.rows_left -= 1;
        Ok(&rest[..len])
    }
}

/// A block-oriented row writer.
///
/// Rows are packed into the current block until the next row would
/// overflow the block capacity, at which point a new block is started. A
/// block header is back-patched when the block closes, so
/// [`close`](RowWriter::close) (or [`finish_block`](RowWriter::finish_block))
/// must run before the output is read back.
pub struct RowWriter<'a> {
    out: &'a mut [u8],
    pos: usize,
    row_upper_bound: u32,
    block_cap: usize,
    header_pos: Option<usize>,
    block_rows: u32,
}

impl<'a> RowWriter<'a> {
    pub fn new(out: &'a mut [u8], row_upper_bound: u32) -> Self {
        Self::with_block_capacity(out, row_upper_bound, MAX_BLOCK_SIZE)
    }

    /// A writer that never splits: all rows land in one block.
    pub fn single_block(out: &'a mut [u8], row_upper_bound: u32) -> Self {
        Self::with_block_capacity(out, row_upper_bound, usize::MAX)
    }

    fn with_block_capacity(out: &'a mut [u8], row_upper_bound: u32, block_cap: usize) -> Self {
        RowWriter {
            out,
            pos: 0,
            row_upper_bound,
            block_cap,
            header_pos: None,
            block_rows: 0,
        }
    }

    /// Bytes emitted so far, block headers included.
    pub fn bytes_written(&self) -> usize {
        self.pos
    }

    /// Appends one bare-framed encrypted row.
    pub fn write_row_bytes(&mut self, row: &[u8]) -> KernelResult<()> {
        if let Some(header_pos) = self.header_pos {
            let payload = self.pos - header_pos - BLOCK_HEADER_SIZE;
            if payload + row.len() > self.block_cap {
                self.finish_block();
            }
        }
        let needed = if self.header_pos.is_none() {
            BLOCK_HEADER_SIZE + row.len()
        } else {
            row.len()
        };
        if self.out.len() < self.pos + needed {
            return Err(KernelError::OutputOverflow {
                needed: self.pos + needed,
                available: self.out.len(),
            });
        }
        if self.header_pos.is_none() {
            // Placeholder header, patched by finish_block.
            self.out[self.pos..self.pos + BLOCK_HEADER_SIZE].fill(0);
            self.header_pos = Some(self.pos);
            self.pos += BLOCK_HEADER_SIZE;
        }
        self.out[self.pos..self.pos + row.len()].copy_from_slice(row);
        self.pos += row.len();
        self.block_rows += 1;
        Ok(())
    }

    /// Closes the current block so that the next row starts a new one.
    /// Used by the partitioner to align partition starts to block
    /// boundaries.
    pub fn finish_block(&mut self) {
        if let Some(header_pos) = self.header_pos.take() {
            let payload = (self.pos - header_pos - BLOCK_HEADER_SIZE) as u32;
            self.out[header_pos..header_pos + 4].copy_from_slice(&payload.to_le_bytes());
            self.out[header_pos + 4..header_pos + 8]
                .copy_from_slice(&self.block_rows.to_le_bytes());
            self.out[header_pos + 8..header_pos + 12]
                .copy_from_slice(&self.row_upper_bound.to_le_bytes());
            self.block_rows = 0;
        }
    }

    /// Flushes the last block and returns the total bytes written.
    pub fn close(mut self) -> usize {
        self.finish_block();
        self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_row(attrs: &[&[u8]]) -> Vec<u8> {
        let mut row = (attrs.len() as u32).to_le_bytes().to_vec();
        for attr in attrs {
            row.extend_from_slice(&(attr.len() as u32).to_le_bytes());
            row.extend_from_slice(attr);
        }
        row
    }

    #[test]
    fn test_write_read_single_block() {
        let rows: Vec<_> = (0u8..5).map(|i| bare_row(&[&[i; 7]])).collect();
        let mut out = vec![0; 256];
        let mut w = RowWriter::new(&mut out, 64);
        for row in &rows {
            w.write_row_bytes(row).unwrap();
        }
        let written = w.close();

        let mut r = RowReader::new(&out[..written]);
        for row in &rows {
            assert_eq!(r.next_row().unwrap(), &row[..]);
        }
        assert!(!r.has_next().unwrap());
    }

    #[test]
    fn test_block_split_and_upper_bound() {
        let row = bare_row(&[&[0xAA; MAX_BLOCK_SIZE / 2]]);
        let mut out = vec![0; 4 * MAX_BLOCK_SIZE];
        let mut w = RowWriter::new(&mut out, 4096);
        for _ in 0..3 {
            w.write_row_bytes(&row).unwrap();
        }
        let written = w.close();

        let mut blocks = BlockReader::new(&out[..written]);
        let mut num_blocks = 0;
        let mut num_rows = 0;
        while let Some((header, _)) = blocks.next_block().unwrap() {
            assert_eq!(header.row_upper_bound, 4096);
            num_blocks += 1;
            num_rows += header.num_rows;
        }
        assert_eq!(num_rows, 3);
        assert!(num_blocks > 1);

        let mut r = RowReader::new(&out[..written]);
        for _ in 0..3 {
            assert_eq!(r.next_row().unwrap(), &row[..]);
        }
    }

    #[test]
    fn test_finish_block_alignment() {
        let row = bare_row(&[&[1, 2, 3]]);
        let mut out = vec![0; 256];
        let mut w = RowWriter::new(&mut out, 64);
        w.write_row_bytes(&row).unwrap();
        w.finish_block();
        let mark = w.bytes_written();
        w.write_row_bytes(&row).unwrap();
        let written = w.close();

        // The suffix starting at the mark is itself a well-formed run.
        let mut r = RowReader::new(&out[mark..written]);
        assert_eq!(r.next_row().unwrap(), &row[..]);
        assert!(!r.has_next().unwrap());
    }

    #[test]
    fn test_attribute_at_bounds() {
        let row = bare_row(&[&[1], &[2, 2]]);
        assert_eq!(attribute_at(&row, 1).unwrap(), &[1]);
        assert_eq!(attribute_at(&row, 2).unwrap(), &[2, 2]);
        assert!(matches!(
            attribute_at(&row, 3),
            Err(KernelError::IndexOutOfRange { idx: 3, num_cols: 2 })
        ));
        assert!(attribute_at(&row, 0).is_err());
    }

    #[test]
    fn test_output_overflow() {
        let row = bare_row(&[&[0; 32]]);
        let mut out = vec![0; 16];
        let mut w = RowWriter::new(&mut out, 64);
        assert!(matches!(
            w.write_row_bytes(&row),
            Err(KernelError::OutputOverflow { .. })
        ));
    }
}
