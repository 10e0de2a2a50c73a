//! Minimal cell tree support: building, parsing, hashing and bag-of-cells
//! encoding for ordinary (level 0) cells.

use crate::address::AccountId;
use sha2::{Digest, Sha256};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use thiserror::Error;

pub const MAX_CELL_BITS: usize = 1023;
pub const MAX_CELL_REFS: usize = 4;

const BOC_MAGIC: [u8; 4] = [0xb5, 0xee, 0x9c, 0x72];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CellError {
    #[error("cell data overflow: {0} bits exceeds {MAX_CELL_BITS}")]
    BitOverflow(usize),
    #[error("cell reference overflow")]
    RefOverflow,
    #[error("cell underflow: need {needed} bits, {left} left")]
    BitUnderflow { needed: usize, left: usize },
    #[error("cell has no more references")]
    RefUnderflow,
    #[error("unsupported address: {0}")]
    UnsupportedAddress(&'static str),
    #[error("invalid bag of cells: {0}")]
    InvalidBoc(&'static str),
}

/// Immutable cell. Depth and representation hash are computed once on
/// construction from the already hashed children.
#[derive(Clone, PartialEq, Eq)]
pub struct Cell {
    data: Vec<u8>,
    bit_len: usize,
    references: Vec<Arc<Cell>>,
    depth: u16,
    hash: [u8; 32],
}

impl Cell {
    fn new(data: Vec<u8>, bit_len: usize, references: Vec<Arc<Cell>>) -> Self {
        let mut cell = Self {
            data,
            bit_len,
            references,
            depth: 0,
            hash: [0; 32],
        };
        cell.depth = cell
            .references
            .iter()
            .map(|child| child.depth + 1)
            .max()
            .unwrap_or(0);
        cell.hash = cell.representation_hash();
        cell
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), 0, Vec::new())
    }

    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn references(&self) -> &[Arc<Cell>] {
        &self.references
    }

    pub fn parser(&self) -> CellParser<'_> {
        CellParser {
            cell: self,
            bit_pos: 0,
            ref_pos: 0,
        }
    }

    pub fn depth(&self) -> u16 {
        self.depth
    }

    /// Representation hash of the cell tree rooted here.
    pub fn hash(&self) -> [u8; 32] {
        self.hash
    }

    fn representation_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.descriptors());
        hasher.update(self.padded_data());
        for child in &self.references {
            hasher.update(child.depth.to_be_bytes());
        }
        for child in &self.references {
            hasher.update(child.hash);
        }
        hasher.finalize().into()
    }

    fn descriptors(&self) -> [u8; 2] {
        let d1 = self.references.len() as u8;
        let d2 = (self.bit_len.div_ceil(8) + self.bit_len / 8) as u8;
        [d1, d2]
    }

    fn padded_data(&self) -> Vec<u8> {
        let mut data = self.data.clone();
        let rem = self.bit_len % 8;
        if rem != 0 {
            if let Some(last) = data.last_mut() {
                *last |= 0x80 >> rem;
            }
        }
        data
    }

    /// Serializes the tree as a single-root bag of cells without index or CRC.
    pub fn to_boc(&self) -> Vec<u8> {
        let order = topological_order(self);
        let index: HashMap<[u8; 32], usize> = order
            .iter()
            .enumerate()
            .map(|(idx, cell)| (cell.hash(), idx))
            .collect();

        let ref_size = bytes_needed(order.len() as u64);
        let mut cells = Vec::new();
        for cell in &order {
            cells.extend_from_slice(&cell.descriptors());
            cells.extend_from_slice(&cell.padded_data());
            for child in &cell.references {
                let idx = index[&child.hash()] as u64;
                cells.extend_from_slice(&idx.to_be_bytes()[8 - ref_size..]);
            }
        }
        let off_size = bytes_needed(cells.len() as u64);

        let mut out = Vec::with_capacity(cells.len() + 16);
        out.extend_from_slice(&BOC_MAGIC);
        out.push(ref_size as u8);
        out.push(off_size as u8);
        out.extend_from_slice(&(order.len() as u64).to_be_bytes()[8 - ref_size..]);
        out.extend_from_slice(&1u64.to_be_bytes()[8 - ref_size..]);
        out.extend_from_slice(&0u64.to_be_bytes()[8 - ref_size..]);
        out.extend_from_slice(&(cells.len() as u64).to_be_bytes()[8 - off_size..]);
        out.extend_from_slice(&0u64.to_be_bytes()[8 - ref_size..]);
        out.extend_from_slice(&cells);
        out
    }

    /// Parses a bag of cells and returns its first root.
    pub fn from_boc(bytes: &[u8]) -> Result<Self, CellError> {
        let mut reader = ByteReader::new(bytes);
        if reader.take(4)? != BOC_MAGIC {
            return Err(CellError::InvalidBoc("unknown magic"));
        }

        let flags = reader.u8()?;
        let has_index = flags & 0x80 != 0;
        let ref_size = (flags & 0x07) as usize;
        let off_size = reader.u8()? as usize;
        if ref_size == 0 || ref_size > 4 || off_size == 0 || off_size > 8 {
            return Err(CellError::InvalidBoc("invalid size fields"));
        }

        let cell_count = reader.uint(ref_size)? as usize;
        let root_count = reader.uint(ref_size)? as usize;
        let _absent = reader.uint(ref_size)?;
        let _total_size = reader.uint(off_size)?;
        if root_count == 0 || cell_count == 0 {
            return Err(CellError::InvalidBoc("no root cell"));
        }
        // Every cell takes at least its two descriptor bytes.
        if cell_count > reader.remaining() / 2 {
            return Err(CellError::InvalidBoc("cell count exceeds input size"));
        }
        let root = reader.uint(ref_size)? as usize;
        reader.take((root_count - 1) * ref_size)?;
        if has_index {
            reader.take(cell_count * off_size)?;
        }

        let mut raw = Vec::with_capacity(cell_count);
        for _ in 0..cell_count {
            let d1 = reader.u8()?;
            let d2 = reader.u8()?;
            if d1 & 0x08 != 0 {
                return Err(CellError::InvalidBoc("exotic cells are not supported"));
            }
            let ref_count = (d1 & 0x07) as usize;
            if ref_count > MAX_CELL_REFS {
                return Err(CellError::InvalidBoc("too many references"));
            }
            let data_len = d2.div_ceil(2) as usize;
            let mut data = reader.take(data_len)?.to_vec();
            let bit_len = if d2 % 2 == 0 {
                data_len * 8
            } else {
                let last = data
                    .last_mut()
                    .ok_or(CellError::InvalidBoc("missing padded byte"))?;
                if *last == 0 {
                    return Err(CellError::InvalidBoc("missing completion tag"));
                }
                let trailing = last.trailing_zeros() as usize;
                *last &= !(1u8 << trailing);
                data_len * 8 - trailing - 1
            };
            let mut refs = Vec::with_capacity(ref_count);
            for _ in 0..ref_count {
                refs.push(reader.uint(ref_size)? as usize);
            }
            raw.push((data, bit_len, refs));
        }

        let mut built: Vec<Option<Arc<Cell>>> = vec![None; cell_count];
        for idx in (0..cell_count).rev() {
            let (data, bit_len, refs) = &raw[idx];
            let references = refs
                .iter()
                .map(|&child| {
                    if child <= idx {
                        return Err(CellError::InvalidBoc("reference points backwards"));
                    }
                    built
                        .get(child)
                        .cloned()
                        .flatten()
                        .ok_or(CellError::InvalidBoc("reference out of range"))
                })
                .collect::<Result<Vec<_>, _>>()?;
            built[idx] = Some(Arc::new(Cell::new(data.clone(), *bit_len, references)));
        }

        built
            .get(root)
            .cloned()
            .flatten()
            .map(|cell| (*cell).clone())
            .ok_or(CellError::InvalidBoc("root out of range"))
    }
}

impl std::fmt::Debug for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cell")
            .field("bits", &self.bit_len)
            .field("data", &hex::encode(&self.data))
            .field("refs", &self.references.len())
            .finish()
    }
}

fn topological_order(root: &Cell) -> Vec<&Cell> {
    fn visit<'a>(cell: &'a Cell, seen: &mut HashSet<[u8; 32]>, out: &mut Vec<&'a Cell>) {
        if !seen.insert(cell.hash()) {
            return;
        }
        for child in &cell.references {
            visit(child, seen, out);
        }
        out.push(cell);
    }

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    visit(root, &mut seen, &mut out);
    out.reverse();
    out
}

fn bytes_needed(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(8).max(1)
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CellError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(CellError::InvalidBoc("unexpected end of input"))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn u8(&mut self) -> Result<u8, CellError> {
        Ok(self.take(1)?[0])
    }

    fn uint(&mut self, len: usize) -> Result<u64, CellError> {
        Ok(self
            .take(len)?
            .iter()
            .fold(0u64, |acc, byte| (acc << 8) | *byte as u64))
    }
}

#[derive(Debug, Default)]
pub struct CellBuilder {
    data: Vec<u8>,
    bit_len: usize,
    references: Vec<Arc<Cell>>,
}

impl CellBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    pub fn store_bit(&mut self, bit: bool) -> Result<&mut Self, CellError> {
        if self.bit_len == MAX_CELL_BITS {
            return Err(CellError::BitOverflow(self.bit_len + 1));
        }
        let byte = self.bit_len / 8;
        if byte == self.data.len() {
            self.data.push(0);
        }
        if bit {
            self.data[byte] |= 0x80 >> (self.bit_len % 8);
        }
        self.bit_len += 1;
        Ok(self)
    }

    /// Stores the low `bits` bits of `value`, most significant first.
    pub fn store_uint(&mut self, value: u64, bits: usize) -> Result<&mut Self, CellError> {
        if bits < 64 && value >> bits != 0 {
            return Err(CellError::BitOverflow(bits));
        }
        if self.bit_len + bits > MAX_CELL_BITS {
            return Err(CellError::BitOverflow(self.bit_len + bits));
        }
        for shift in (0..bits).rev() {
            self.store_bit((value >> shift) & 1 == 1)?;
        }
        Ok(self)
    }

    pub fn store_u8(&mut self, value: u8) -> Result<&mut Self, CellError> {
        self.store_uint(value as u64, 8)
    }

    pub fn store_u32(&mut self, value: u32) -> Result<&mut Self, CellError> {
        self.store_uint(value as u64, 32)
    }

    pub fn store_u64(&mut self, value: u64) -> Result<&mut Self, CellError> {
        self.store_uint(value, 64)
    }

    pub fn store_i8(&mut self, value: i8) -> Result<&mut Self, CellError> {
        self.store_uint(value as u8 as u64, 8)
    }

    pub fn store_bytes(&mut self, bytes: &[u8]) -> Result<&mut Self, CellError> {
        if self.bit_len + bytes.len() * 8 > MAX_CELL_BITS {
            return Err(CellError::BitOverflow(self.bit_len + bytes.len() * 8));
        }
        for byte in bytes {
            self.store_u8(*byte)?;
        }
        Ok(self)
    }

    /// Appends the bits and references of `cell`.
    pub fn store_cell_contents(&mut self, cell: &Cell) -> Result<&mut Self, CellError> {
        let mut parser = cell.parser();
        for _ in 0..cell.bit_len() {
            self.store_bit(parser.load_bit()?)?;
        }
        for child in cell.references() {
            self.store_reference(child.clone())?;
        }
        Ok(self)
    }

    /// Stores an amount as `VarUInteger 16`.
    pub fn store_coins(&mut self, amount: u64) -> Result<&mut Self, CellError> {
        let len = bytes_needed(amount);
        if amount == 0 {
            return self.store_uint(0, 4);
        }
        self.store_uint(len as u64, 4)?;
        self.store_bytes(&amount.to_be_bytes()[8 - len..])
    }

    /// Stores `addr_none` for `None`, else `addr_std` without anycast.
    pub fn store_address(&mut self, address: Option<&AccountId>) -> Result<&mut Self, CellError> {
        match address {
            None => self.store_uint(0b00, 2),
            Some(account) => {
                let workchain = i8::try_from(account.workchain)
                    .map_err(|_| CellError::UnsupportedAddress("workchain out of i8 range"))?;
                self.store_uint(0b10, 2)?;
                self.store_bit(false)?;
                self.store_i8(workchain)?;
                self.store_bytes(&account.hash)
            }
        }
    }

    pub fn store_reference(&mut self, cell: Arc<Cell>) -> Result<&mut Self, CellError> {
        if self.references.len() == MAX_CELL_REFS {
            return Err(CellError::RefOverflow);
        }
        self.references.push(cell);
        Ok(self)
    }

    pub fn build(&mut self) -> Cell {
        Cell::new(
            std::mem::take(&mut self.data),
            std::mem::take(&mut self.bit_len),
            std::mem::take(&mut self.references),
        )
    }
}

pub struct CellParser<'a> {
    cell: &'a Cell,
    bit_pos: usize,
    ref_pos: usize,
}

impl CellParser<'_> {
    pub fn remaining_bits(&self) -> usize {
        self.cell.bit_len - self.bit_pos
    }

    fn ensure_bits(&self, needed: usize) -> Result<(), CellError> {
        let left = self.remaining_bits();
        if needed > left {
            return Err(CellError::BitUnderflow { needed, left });
        }
        Ok(())
    }

    pub fn load_bit(&mut self) -> Result<bool, CellError> {
        self.ensure_bits(1)?;
        let byte = self.cell.data[self.bit_pos / 8];
        let bit = byte & (0x80 >> (self.bit_pos % 8)) != 0;
        self.bit_pos += 1;
        Ok(bit)
    }

    pub fn load_uint(&mut self, bits: usize) -> Result<u64, CellError> {
        if bits > 64 {
            return Err(CellError::BitOverflow(bits));
        }
        self.ensure_bits(bits)?;
        let mut value = 0u64;
        for _ in 0..bits {
            value = (value << 1) | self.load_bit()? as u64;
        }
        Ok(value)
    }

    pub fn load_u8(&mut self) -> Result<u8, CellError> {
        Ok(self.load_uint(8)? as u8)
    }

    pub fn load_u32(&mut self) -> Result<u32, CellError> {
        Ok(self.load_uint(32)? as u32)
    }

    pub fn load_i8(&mut self) -> Result<i8, CellError> {
        Ok(self.load_u8()? as i8)
    }

    pub fn load_bytes(&mut self, len: usize) -> Result<Vec<u8>, CellError> {
        self.ensure_bits(len * 8)?;
        (0..len).map(|_| self.load_u8()).collect()
    }

    pub fn load_coins(&mut self) -> Result<u64, CellError> {
        let len = self.load_uint(4)? as usize;
        if len > 8 {
            return Err(CellError::BitOverflow(len * 8));
        }
        self.load_uint(len * 8)
    }

    /// Loads a `MsgAddress`; `addr_none` decodes to `None`.
    pub fn load_address(&mut self) -> Result<Option<AccountId>, CellError> {
        match self.load_uint(2)? {
            0b00 => Ok(None),
            0b10 => {
                if self.load_bit()? {
                    return Err(CellError::UnsupportedAddress("anycast"));
                }
                let workchain = self.load_i8()? as i32;
                let bytes = self.load_bytes(32)?;
                let mut hash = [0u8; 32];
                hash.copy_from_slice(&bytes);
                Ok(Some(AccountId::new(workchain, hash)))
            }
            0b01 => Err(CellError::UnsupportedAddress("external")),
            _ => Err(CellError::UnsupportedAddress("variable length")),
        }
    }

    pub fn load_reference(&mut self) -> Result<&Arc<Cell>, CellError> {
        let cell = self
            .cell
            .references
            .get(self.ref_pos)
            .ok_or(CellError::RefUnderflow)?;
        self.ref_pos += 1;
        Ok(cell)
    }
}
