//! Per-file key/value metadata
//!
//! ```text
//! ┌──────────────┐  Slot::MetaData   ┌────────────────┐  Slot::LargeMeta(i)  ┌───────────────┐
//! │ file object  │ ────────────────► │ MetaBlock      │ ───────────────────► │ large payload │
//! └──────────────┘                   │ small entries  │                      │ (paged on use)│
//!                                    │ large headers  │                      └───────────────┘
//!                                    └────────────────┘
//! ```
//!
//! Small entries are parsed with the metadata block. Large entries record
//! where their zipped payload lives and are paged in on first access; the
//! [`MetaData`] handle that read them keeps them referenced until it is
//! released.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::cache::state::{Payload, Slot};
use crate::cache::{Built, Handle};
use crate::error::{Error, Result};
use crate::format::LeCursor;
use crate::io::BlockReader;
use crate::reader::{Reader, ReaderInner};
use crate::reader::open::read_zipped;

// =============================================================================
// Value Types
// =============================================================================

/// Element type of a metadata value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetaDataType {
    String,
    Int8,
    Int16,
    Int32,
    Float,
    Double,
}

impl MetaDataType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(MetaDataType::String),
            1 => Some(MetaDataType::Int8),
            2 => Some(MetaDataType::Int16),
            3 => Some(MetaDataType::Int32),
            4 => Some(MetaDataType::Float),
            5 => Some(MetaDataType::Double),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            MetaDataType::String => 0,
            MetaDataType::Int8 => 1,
            MetaDataType::Int16 => 2,
            MetaDataType::Int32 => 3,
            MetaDataType::Float => 4,
            MetaDataType::Double => 5,
        }
    }

    /// Bytes per element; strings count bytes
    pub fn size(self) -> usize {
        match self {
            MetaDataType::String | MetaDataType::Int8 => 1,
            MetaDataType::Int16 => 2,
            MetaDataType::Int32 | MetaDataType::Float => 4,
            MetaDataType::Double => 8,
        }
    }
}

impl std::fmt::Display for MetaDataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MetaDataType::String => "string",
            MetaDataType::Int8 => "int8",
            MetaDataType::Int16 => "int16",
            MetaDataType::Int32 => "int32",
            MetaDataType::Float => "float",
            MetaDataType::Double => "double",
        };
        f.write_str(name)
    }
}

/// Decoded metadata value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetaValue {
    Str(String),
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl MetaValue {
    /// Decode little-endian `data` as elements of `data_type`
    ///
    /// Strings drop their trailing NUL; a partial trailing element is
    /// ignored.
    pub fn decode(data_type: MetaDataType, data: &[u8]) -> Self {
        match data_type {
            MetaDataType::String => {
                let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
                MetaValue::Str(String::from_utf8_lossy(&data[..end]).into_owned())
            }
            MetaDataType::Int8 => MetaValue::I8(data.iter().map(|&b| b as i8).collect()),
            MetaDataType::Int16 => MetaValue::I16(
                data.chunks_exact(2)
                    .map(|c| i16::from_le_bytes([c[0], c[1]]))
                    .collect(),
            ),
            MetaDataType::Int32 => MetaValue::I32(
                data.chunks_exact(4)
                    .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            MetaDataType::Float => MetaValue::F32(
                data.chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            MetaDataType::Double => MetaValue::F64(
                data.chunks_exact(8)
                    .map(|c| {
                        let mut b = [0u8; 8];
                        b.copy_from_slice(c);
                        f64::from_le_bytes(b)
                    })
                    .collect(),
            ),
        }
    }

    pub fn data_type(&self) -> MetaDataType {
        match self {
            MetaValue::Str(_) => MetaDataType::String,
            MetaValue::I8(_) => MetaDataType::Int8,
            MetaValue::I16(_) => MetaDataType::Int16,
            MetaValue::I32(_) => MetaDataType::Int32,
            MetaValue::F32(_) => MetaDataType::Float,
            MetaValue::F64(_) => MetaDataType::Double,
        }
    }
}

// =============================================================================
// Metadata Block
// =============================================================================

/// Where an entry's bytes live
#[derive(Debug, Clone)]
enum MetaSource {
    Inline(Bytes),
    Large { pos: u64, zip_size: u32 },
}

#[derive(Debug, Clone)]
struct MetaEntry {
    key: String,
    data_type: MetaDataType,
    data_size: u32,
    source: MetaSource,
}

/// Parsed metadata of one file, in key insertion order
#[derive(Debug, Default)]
pub(crate) struct MetaBlock {
    entries: Vec<MetaEntry>,
    index: HashMap<String, usize>,
}

impl MetaBlock {
    /// Insert or replace; a replaced key keeps its original position
    fn insert(&mut self, entry: MetaEntry) {
        match self.index.get(&entry.key) {
            Some(&i) => self.entries[i] = entry,
            None => {
                self.index.insert(entry.key.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    fn parse_key(c: &mut LeCursor<'_>) -> Result<(String, MetaDataType, u32)> {
        let key_size = c.u8()? as usize;
        let raw = c.bytes(key_size)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        let key = String::from_utf8_lossy(&raw[..end]).into_owned();
        let tag = c.u8()?;
        let data_type = MetaDataType::from_u8(tag)
            .ok_or_else(|| Error::CorruptData(format!("metadata key {} has type {}", key, tag)))?;
        let data_size = c.u32()?;
        Ok((key, data_type, data_size))
    }

    /// Add the `{key, type, size, data}` records of an inflated block
    pub(crate) fn add_small(&mut self, buf: &[u8]) -> Result<()> {
        let mut c = LeCursor::new(buf);
        while c.remaining() > 0 {
            let (key, data_type, data_size) = Self::parse_key(&mut c)?;
            let data = Bytes::copy_from_slice(c.bytes(data_size as usize)?);
            self.insert(MetaEntry {
                key,
                data_type,
                data_size,
                source: MetaSource::Inline(data),
            });
        }
        Ok(())
    }

    /// Add `{key, type, size, zipsize}` large-entry headers
    ///
    /// Payloads are stored back to back starting at `data_pos`.
    pub(crate) fn add_large(&mut self, buf: &[u8], data_pos: u64) -> Result<()> {
        let mut c = LeCursor::new(buf);
        let mut pos = data_pos;
        while c.remaining() > 0 {
            let (key, data_type, data_size) = Self::parse_key(&mut c)?;
            let zip_size = c.u32()?;
            self.insert(MetaEntry {
                key,
                data_type,
                data_size,
                source: MetaSource::Large { pos, zip_size },
            });
            pos += zip_size as u64;
        }
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn memory_size(&self) -> usize {
        let entries: usize = self
            .entries
            .iter()
            .map(|e| {
                let inline = match &e.source {
                    MetaSource::Inline(data) => data.len(),
                    MetaSource::Large { .. } => 0,
                };
                std::mem::size_of::<MetaEntry>() + 2 * e.key.len() + inline
            })
            .sum();
        std::mem::size_of::<MetaBlock>() + entries
    }
}

impl ReaderInner {
    /// Read the main block, large-entry headers and metadata edits
    pub(crate) fn read_meta_block(&self, io: &mut BlockReader) -> Result<MetaBlock> {
        let mut block = MetaBlock::default();

        let main = read_zipped(
            io,
            &self.metrics,
            self.sections.metadata_pos,
            self.header.metadata_zip_size as usize,
            self.header.metadata_mem_size as usize,
        )?;
        block.add_small(&main)?;

        if self.ext.lmd_header_zip_size > 0 {
            let headers = read_zipped(
                io,
                &self.metrics,
                self.sections.lmd_header_pos,
                self.ext.lmd_header_zip_size as usize,
                self.ext.lmd_header_mem_size as usize,
            )?;
            block.add_large(&headers, self.sections.lmd_data_pos)?;
        }

        for edit in &self.meta_edits {
            let data = read_zipped(
                io,
                &self.metrics,
                edit.pos,
                edit.zip_size as usize,
                edit.mem_size as usize,
            )?;
            block.add_small(&data)?;
        }

        self.metrics.record_metadata_read();
        debug!(path = %self.path, keys = block.len(), "Metadata loaded");
        Ok(block)
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Counted handle on a file's metadata
///
/// Large values read through this handle stay referenced until it is
/// released or dropped.
pub struct MetaData {
    handle: Handle,
    block: Arc<MetaBlock>,
    reader: Arc<ReaderInner>,
    large: Mutex<HashMap<usize, (Handle, Bytes)>>,
}

impl Reader {
    /// Metadata of this file, parsed on first use
    pub fn meta_data(&self) -> Result<MetaData> {
        let shared = self.handle.shared();
        let file = self.handle.id();
        let inner = &self.inner;

        let (handle, payload) = match shared.acquire(file, Slot::MetaData) {
            Some(found) => found,
            None => {
                inner.ensure_ok()?;
                shared.build_gated(file, Slot::MetaData, &inner.read_lock, |io| {
                    let block = inner.track(inner.read_meta_block(io))?;
                    let size = block.memory_size();
                    Ok(Built::new(Payload::Meta(Arc::new(block)), size))
                })?
            }
        };

        Ok(MetaData {
            handle,
            block: payload.into_meta()?,
            reader: inner.clone(),
            large: Mutex::new(HashMap::new()),
        })
    }
}

impl MetaData {
    /// Release this reference and every large value it holds
    pub fn release(self) {}

    pub fn num_keys(&self) -> usize {
        self.block.entries.len()
    }

    /// Keys in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.block.entries.iter().map(|e| e.key.as_str())
    }

    /// Position of `key`, if present
    pub fn find_key(&self, key: &str) -> Option<usize> {
        self.block.index.get(key).copied()
    }

    /// Key, type and element count of entry `index`
    pub fn key_info(&self, index: usize) -> Option<(&str, MetaDataType, usize)> {
        self.block.entries.get(index).map(|e| {
            (
                e.key.as_str(),
                e.data_type,
                e.data_size as usize / e.data_type.size(),
            )
        })
    }

    /// Raw little-endian bytes of `key`, paging in large values
    pub fn raw(&self, key: &str) -> Result<Option<Bytes>> {
        match self.find_key(key) {
            Some(index) => self.entry_bytes(index).map(Some),
            None => Ok(None),
        }
    }

    /// Decoded value of `key`
    pub fn value(&self, key: &str) -> Result<Option<MetaValue>> {
        let Some(index) = self.find_key(key) else {
            return Ok(None);
        };
        let data_type = self.block.entries[index].data_type;
        let data = self.entry_bytes(index)?;
        Ok(Some(MetaValue::decode(data_type, &data)))
    }

    pub fn get_str(&self, key: &str) -> Result<Option<String>> {
        Ok(match self.value(key)? {
            Some(MetaValue::Str(s)) => Some(s),
            _ => None,
        })
    }

    pub fn get_i8s(&self, key: &str) -> Result<Option<Vec<i8>>> {
        Ok(match self.value(key)? {
            Some(MetaValue::I8(v)) => Some(v),
            _ => None,
        })
    }

    pub fn get_i16s(&self, key: &str) -> Result<Option<Vec<i16>>> {
        Ok(match self.value(key)? {
            Some(MetaValue::I16(v)) => Some(v),
            _ => None,
        })
    }

    pub fn get_i32s(&self, key: &str) -> Result<Option<Vec<i32>>> {
        Ok(match self.value(key)? {
            Some(MetaValue::I32(v)) => Some(v),
            _ => None,
        })
    }

    pub fn get_f32s(&self, key: &str) -> Result<Option<Vec<f32>>> {
        Ok(match self.value(key)? {
            Some(MetaValue::F32(v)) => Some(v),
            _ => None,
        })
    }

    pub fn get_f64s(&self, key: &str) -> Result<Option<Vec<f64>>> {
        Ok(match self.value(key)? {
            Some(MetaValue::F64(v)) => Some(v),
            _ => None,
        })
    }

    fn entry_bytes(&self, index: usize) -> Result<Bytes> {
        let entry = &self.block.entries[index];
        match entry.source {
            MetaSource::Inline(ref data) => Ok(data.clone()),
            MetaSource::Large { pos, zip_size } => {
                if let Some((_, data)) = self.large.lock().get(&index) {
                    return Ok(data.clone());
                }
                let (handle, data) = self.load_large(index, pos, zip_size, entry.data_size)?;
                self.large.lock().insert(index, (handle, data.clone()));
                Ok(data)
            }
        }
    }

    fn load_large(&self, index: usize, pos: u64, zip_size: u32, mem_size: u32) -> Result<(Handle, Bytes)> {
        let shared = self.handle.shared();
        let slot = Slot::LargeMeta(index as u32);
        let (handle, payload) = match shared.acquire(self.handle.id(), slot) {
            Some(found) => found,
            None => {
                let inner = &self.reader;
                inner.ensure_ok()?;
                shared.build_gated(self.handle.id(), slot, &inner.read_lock, |io| {
                    let data = inner.track(read_zipped(
                        io,
                        &inner.metrics,
                        pos,
                        zip_size as usize,
                        mem_size as usize,
                    ))?;
                    let size = data.len();
                    Ok(Built::new(Payload::LargeMeta(Bytes::from(data)), size))
                })?
            }
        };
        Ok((handle, payload.into_large_meta()?))
    }
}

impl Clone for MetaData {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            block: self.block.clone(),
            reader: self.reader.clone(),
            large: Mutex::new(self.large.lock().clone()),
        }
    }
}

impl std::fmt::Debug for MetaData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaData")
            .field("keys", &self.num_keys())
            .field("large_loaded", &self.large.lock().len())
            .field("handle", &self.handle)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
