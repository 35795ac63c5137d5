//! On-Disk Records
//!
//! Fixed-layout little-endian records of the per-face texture format.
//!
//! # File Layout
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ Header (64 bytes)            │
//! │ ExtHeader (extheadersize)    │
//! │ Face info table (zlib)       │
//! │ Constant pixel table (zlib)  │
//! │ Level info table (raw)       │
//! │ Level data (per level)       │  headers (zlib) + face blocks
//! │ Metadata block (zlib)        │
//! │ 8-byte barrier               │
//! │ Large metadata headers (zlib)│
//! │ Large metadata data          │
//! │ Edit records                 │  {type: u8, size: u32, payload}
//! └──────────────────────────────┘
//! ```

use crate::error::{Error, Result};

/// `"Ptex"` read as a little-endian u32
pub const MAGIC: u32 = u32::from_le_bytes(*b"Ptex");

/// Supported major version
pub const VERSION: u32 = 1;

pub const HEADER_SIZE: usize = 64;
pub const EXT_HEADER_SIZE: usize = 40;
pub const FACE_INFO_SIZE: usize = 20;
pub const LEVEL_INFO_SIZE: usize = 16;
pub const FACE_DATA_HEADER_SIZE: usize = 4;
pub const EDIT_FACE_DATA_HEADER_SIZE: usize = 4 + FACE_INFO_SIZE + FACE_DATA_HEADER_SIZE;
pub const EDIT_META_DATA_HEADER_SIZE: usize = 8;

/// Size of the compatibility barrier between the metadata block and the
/// large metadata headers
pub const METADATA_BARRIER_SIZE: u64 = 8;

// =============================================================================
// Little-endian cursor
// =============================================================================

/// Bounds-checked little-endian field reader over a byte slice
pub(crate) struct LeCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> LeCursor<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(Error::CorruptData(format!(
                "record needs {} bytes, {} left",
                len,
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub(crate) fn i8(&mut self) -> Result<i8> {
        Ok(self.u8()? as i8)
    }

    pub(crate) fn u16(&mut self) -> Result<u16> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn i32(&mut self) -> Result<i32> {
        Ok(self.u32()? as i32)
    }

    pub(crate) fn u64(&mut self) -> Result<u64> {
        let b = self.bytes(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }
}

// =============================================================================
// Enumerations
// =============================================================================

/// Base mesh primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum MeshType {
    Triangle,
    Quad,
}

impl MeshType {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(MeshType::Triangle),
            1 => Some(MeshType::Quad),
            _ => None,
        }
    }

    pub fn to_u32(self) -> u32 {
        match self {
            MeshType::Triangle => 0,
            MeshType::Quad => 1,
        }
    }
}

impl std::fmt::Display for MeshType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MeshType::Triangle => write!(f, "triangle"),
            MeshType::Quad => write!(f, "quad"),
        }
    }
}

/// Channel storage type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum DataType {
    U8,
    U16,
    Half,
    F32,
}

impl DataType {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(DataType::U8),
            1 => Some(DataType::U16),
            2 => Some(DataType::Half),
            3 => Some(DataType::F32),
            _ => None,
        }
    }

    pub fn to_u32(self) -> u32 {
        match self {
            DataType::U8 => 0,
            DataType::U16 => 1,
            DataType::Half => 2,
            DataType::F32 => 3,
        }
    }

    /// Bytes per channel
    #[inline]
    pub fn size(self) -> usize {
        match self {
            DataType::U8 => 1,
            DataType::U16 | DataType::Half => 2,
            DataType::F32 => 4,
        }
    }

    /// Whether the channel values are floating point
    pub fn is_float(self) -> bool {
        matches!(self, DataType::Half | DataType::F32)
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataType::U8 => write!(f, "uint8"),
            DataType::U16 => write!(f, "uint16"),
            DataType::Half => write!(f, "half"),
            DataType::F32 => write!(f, "float"),
        }
    }
}

/// Texture border behavior recorded in the extended header
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum BorderMode {
    Clamp,
    Black,
    Periodic,
}

impl BorderMode {
    pub fn from_u32(v: u32) -> Self {
        match v {
            1 => BorderMode::Black,
            2 => BorderMode::Periodic,
            _ => BorderMode::Clamp,
        }
    }
}

/// Encoding of one face (or tile) data block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Constant,
    Zipped,
    DiffZipped,
    Tiled,
}

/// Edit record type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditType {
    FaceData,
    MetaData,
}

impl EditType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(EditType::FaceData),
            1 => Some(EditType::MetaData),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            EditType::FaceData => 0,
            EditType::MetaData => 1,
        }
    }
}

/// Edge ids, counter-clockwise from the bottom
pub const EDGE_BOTTOM: usize = 0;
pub const EDGE_RIGHT: usize = 1;
pub const EDGE_TOP: usize = 2;
pub const EDGE_LEFT: usize = 3;

// =============================================================================
// Resolution
// =============================================================================

/// Face resolution as log2 of the u and v texel counts
///
/// A negative log2 names a blended half level along that axis; such a
/// level still holds one texel along the axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize)]
pub struct Res {
    pub ulog2: i8,
    pub vlog2: i8,
}

impl Res {
    /// Largest log2 a stored face may carry along either axis
    pub const MAX_LOG2: i8 = 30;

    pub const fn new(ulog2: i8, vlog2: i8) -> Self {
        Self { ulog2, vlog2 }
    }

    /// Texels along u, saturating at `2^MAX_LOG2`
    #[inline]
    pub fn u(&self) -> usize {
        1usize << self.ulog2.clamp(0, Self::MAX_LOG2)
    }

    /// Texels along v, saturating at `2^MAX_LOG2`
    #[inline]
    pub fn v(&self) -> usize {
        1usize << self.vlog2.clamp(0, Self::MAX_LOG2)
    }

    /// Total texel count
    #[inline]
    pub fn size(&self) -> usize {
        self.u().saturating_mul(self.v())
    }

    /// Packed key, unique per (ulog2, vlog2)
    #[inline]
    pub fn val(&self) -> u16 {
        ((self.ulog2 as u8 as u16) << 8) | (self.vlog2 as u8 as u16)
    }

    /// Resolution with u and v exchanged
    pub fn swapped(&self) -> Res {
        Res::new(self.vlog2, self.ulog2)
    }

    /// True when both axes are at least as large as `other`
    pub fn covers(&self, other: &Res) -> bool {
        self.ulog2 >= other.ulog2 && self.vlog2 >= other.vlog2
    }

    /// True when neither axis is a blended half level
    pub fn is_whole(&self) -> bool {
        self.ulog2 >= 0 && self.vlog2 >= 0
    }

    /// True when both axes fall in the range a file may store
    pub fn is_storable(&self) -> bool {
        let range = 0..=Self::MAX_LOG2;
        range.contains(&self.ulog2) && range.contains(&self.vlog2)
    }

    /// Tiles along u when split at `tile_res`
    pub fn ntiles_u(&self, tile_res: Res) -> usize {
        tile_count(self.ulog2, tile_res.ulog2)
    }

    /// Tiles along v when split at `tile_res`
    pub fn ntiles_v(&self, tile_res: Res) -> usize {
        tile_count(self.vlog2, tile_res.vlog2)
    }

    /// Total tile count when split at `tile_res`
    pub fn ntiles(&self, tile_res: Res) -> usize {
        self.ntiles_u(tile_res).saturating_mul(self.ntiles_v(tile_res))
    }
}

fn tile_count(face_log2: i8, tile_log2: i8) -> usize {
    let shift = (i32::from(face_log2) - i32::from(tile_log2)).clamp(0, i32::from(Res::MAX_LOG2));
    1usize << shift
}

impl std::fmt::Display for Res {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.u(), self.v())
    }
}

// =============================================================================
// Header
// =============================================================================

/// Fixed file header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub magic: u32,
    pub version: u32,
    pub mesh_type: u32,
    pub data_type: u32,
    pub alpha_chan: i32,
    pub nchannels: u16,
    pub nlevels: u16,
    pub nfaces: u32,
    pub ext_header_size: u32,
    pub face_info_size: u32,
    pub const_data_size: u32,
    pub level_info_size: u32,
    pub minor_version: u32,
    pub level_data_size: u64,
    pub metadata_zip_size: u32,
    pub metadata_mem_size: u32,
}

impl Header {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let mut c = LeCursor::new(buf);
        Ok(Self {
            magic: c.u32()?,
            version: c.u32()?,
            mesh_type: c.u32()?,
            data_type: c.u32()?,
            alpha_chan: c.i32()?,
            nchannels: c.u16()?,
            nlevels: c.u16()?,
            nfaces: c.u32()?,
            ext_header_size: c.u32()?,
            face_info_size: c.u32()?,
            const_data_size: c.u32()?,
            level_info_size: c.u32()?,
            minor_version: c.u32()?,
            level_data_size: c.u64()?,
            metadata_zip_size: c.u32()?,
            metadata_mem_size: c.u32()?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE);
        out.extend_from_slice(&self.magic.to_le_bytes());
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.mesh_type.to_le_bytes());
        out.extend_from_slice(&self.data_type.to_le_bytes());
        out.extend_from_slice(&self.alpha_chan.to_le_bytes());
        out.extend_from_slice(&self.nchannels.to_le_bytes());
        out.extend_from_slice(&self.nlevels.to_le_bytes());
        out.extend_from_slice(&self.nfaces.to_le_bytes());
        out.extend_from_slice(&self.ext_header_size.to_le_bytes());
        out.extend_from_slice(&self.face_info_size.to_le_bytes());
        out.extend_from_slice(&self.const_data_size.to_le_bytes());
        out.extend_from_slice(&self.level_info_size.to_le_bytes());
        out.extend_from_slice(&self.minor_version.to_le_bytes());
        out.extend_from_slice(&self.level_data_size.to_le_bytes());
        out.extend_from_slice(&self.metadata_zip_size.to_le_bytes());
        out.extend_from_slice(&self.metadata_mem_size.to_le_bytes());
        out
    }

    /// Bytes per pixel, or None if the data type is unknown
    pub fn pixel_size(&self) -> Option<usize> {
        DataType::from_u32(self.data_type).map(|dt| dt.size() * self.nchannels as usize)
    }
}

/// Extended header; older files may carry a shorter one
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtHeader {
    pub u_border_mode: u32,
    pub v_border_mode: u32,
    pub lmd_header_zip_size: u32,
    pub lmd_header_mem_size: u32,
    pub lmd_data_size: u64,
    pub edit_data_size: u64,
    pub edit_data_pos: u64,
}

impl ExtHeader {
    /// Parse a possibly short extended header; absent fields stay zero
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let mut padded = [0u8; EXT_HEADER_SIZE];
        let n = buf.len().min(EXT_HEADER_SIZE);
        padded[..n].copy_from_slice(&buf[..n]);
        let mut c = LeCursor::new(&padded);
        Ok(Self {
            u_border_mode: c.u32()?,
            v_border_mode: c.u32()?,
            lmd_header_zip_size: c.u32()?,
            lmd_header_mem_size: c.u32()?,
            lmd_data_size: c.u64()?,
            edit_data_size: c.u64()?,
            edit_data_pos: c.u64()?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(EXT_HEADER_SIZE);
        out.extend_from_slice(&self.u_border_mode.to_le_bytes());
        out.extend_from_slice(&self.v_border_mode.to_le_bytes());
        out.extend_from_slice(&self.lmd_header_zip_size.to_le_bytes());
        out.extend_from_slice(&self.lmd_header_mem_size.to_le_bytes());
        out.extend_from_slice(&self.lmd_data_size.to_le_bytes());
        out.extend_from_slice(&self.edit_data_size.to_le_bytes());
        out.extend_from_slice(&self.edit_data_pos.to_le_bytes());
        out
    }
}

// =============================================================================
// Face Info
// =============================================================================

/// Per-face resolution, adjacency and flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct FaceInfo {
    pub res: Res,
    /// Two bits per edge: the edge id of the neighbor that touches each edge
    pub adj_edges: u8,
    pub flags: u8,
    /// Neighbor face per edge, -1 when on a boundary
    pub adj_faces: [i32; 4],
}

impl FaceInfo {
    pub const FLAG_CONSTANT: u8 = 1;
    pub const FLAG_HAS_EDITS: u8 = 2;
    pub const FLAG_NB_CONSTANT: u8 = 4;
    pub const FLAG_SUBFACE: u8 = 8;

    pub fn new(res: Res) -> Self {
        Self {
            res,
            adj_edges: 0,
            flags: 0,
            adj_faces: [-1; 4],
        }
    }

    pub(crate) fn parse(c: &mut LeCursor<'_>) -> Result<Self> {
        let ulog2 = c.i8()?;
        let vlog2 = c.i8()?;
        let adj_edges = c.u8()?;
        let flags = c.u8()?;
        let mut adj_faces = [0i32; 4];
        for face in adj_faces.iter_mut() {
            *face = c.i32()?;
        }
        Ok(Self {
            res: Res::new(ulog2, vlog2),
            adj_edges,
            flags,
            adj_faces,
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.push(self.res.ulog2 as u8);
        out.push(self.res.vlog2 as u8);
        out.push(self.adj_edges);
        out.push(self.flags);
        for face in &self.adj_faces {
            out.extend_from_slice(&face.to_le_bytes());
        }
    }

    #[inline]
    pub fn is_constant(&self) -> bool {
        self.flags & Self::FLAG_CONSTANT != 0
    }

    #[inline]
    pub fn has_edits(&self) -> bool {
        self.flags & Self::FLAG_HAS_EDITS != 0
    }

    #[inline]
    pub fn is_neighborhood_constant(&self) -> bool {
        self.flags & Self::FLAG_NB_CONSTANT != 0
    }

    #[inline]
    pub fn is_subface(&self) -> bool {
        self.flags & Self::FLAG_SUBFACE != 0
    }

    /// Edge id of the neighbor across edge `eid`
    #[inline]
    pub fn adj_edge(&self, eid: usize) -> usize {
        ((self.adj_edges >> (2 * eid)) & 3) as usize
    }

    /// Neighbor face across edge `eid`
    #[inline]
    pub fn adj_face(&self, eid: usize) -> i32 {
        self.adj_faces[eid]
    }

    /// Set the neighbor across edge `eid`
    pub fn set_adjacent(&mut self, eid: usize, face: i32, edge: usize) {
        self.adj_faces[eid] = face;
        self.adj_edges &= !(3 << (2 * eid));
        self.adj_edges |= ((edge & 3) as u8) << (2 * eid);
    }
}

// =============================================================================
// Level Info & Data Headers
// =============================================================================

/// Directory entry for one stored level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelInfo {
    pub level_data_size: u64,
    pub level_header_size: u32,
    pub nfaces: u32,
}

impl LevelInfo {
    pub(crate) fn parse(c: &mut LeCursor<'_>) -> Result<Self> {
        Ok(Self {
            level_data_size: c.u64()?,
            level_header_size: c.u32()?,
            nfaces: c.u32()?,
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.level_data_size.to_le_bytes());
        out.extend_from_slice(&self.level_header_size.to_le_bytes());
        out.extend_from_slice(&self.nfaces.to_le_bytes());
    }
}

/// Packed block size (30 bits) and encoding (2 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FaceDataHeader(pub u32);

impl FaceDataHeader {
    pub fn new(block_size: u32, encoding: Encoding) -> Self {
        let enc = match encoding {
            Encoding::Constant => 0,
            Encoding::Zipped => 1,
            Encoding::DiffZipped => 2,
            Encoding::Tiled => 3,
        };
        Self((block_size & 0x3fff_ffff) | (enc << 30))
    }

    #[inline]
    pub fn block_size(&self) -> u32 {
        self.0 & 0x3fff_ffff
    }

    #[inline]
    pub fn encoding(&self) -> Encoding {
        match (self.0 >> 30) & 3 {
            0 => Encoding::Constant,
            1 => Encoding::Zipped,
            2 => Encoding::DiffZipped,
            _ => Encoding::Tiled,
        }
    }

    /// Parse `count` consecutive headers
    pub fn parse_all(buf: &[u8], count: usize) -> Result<Vec<Self>> {
        let mut c = LeCursor::new(buf);
        (0..count).map(|_| c.u32().map(FaceDataHeader)).collect()
    }
}

/// Absolute offsets of consecutive blocks starting at `start`
pub fn compute_offsets(start: u64, headers: &[FaceDataHeader]) -> Vec<u64> {
    let mut pos = start;
    headers
        .iter()
        .map(|fdh| {
            let at = pos;
            pos += fdh.block_size() as u64;
            at
        })
        .collect()
}

// =============================================================================
// Edit Headers
// =============================================================================

/// Header of a face-data edit record
#[derive(Debug, Clone, Copy)]
pub struct EditFaceDataHeader {
    pub face_id: u32,
    pub face_info: FaceInfo,
    pub fdh: FaceDataHeader,
}

impl EditFaceDataHeader {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let mut c = LeCursor::new(buf);
        Ok(Self {
            face_id: c.u32()?,
            face_info: FaceInfo::parse(&mut c)?,
            fdh: FaceDataHeader(c.u32()?),
        })
    }
}

/// Header of a metadata edit record
#[derive(Debug, Clone, Copy)]
pub struct EditMetaDataHeader {
    pub zip_size: u32,
    pub mem_size: u32,
}

impl EditMetaDataHeader {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let mut c = LeCursor::new(buf);
        Ok(Self {
            zip_size: c.u32()?,
            mem_size: c.u32()?,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> Header {
        Header {
            magic: MAGIC,
            version: VERSION,
            mesh_type: 1,
            data_type: 3,
            alpha_chan: -1,
            nchannels: 3,
            nlevels: 2,
            nfaces: 6,
            ext_header_size: EXT_HEADER_SIZE as u32,
            face_info_size: 40,
            const_data_size: 30,
            level_info_size: 32,
            minor_version: 0,
            level_data_size: 1 << 33,
            metadata_zip_size: 12,
            metadata_mem_size: 20,
        }
    }

    #[test]
    fn test_magic_spells_ptex() {
        assert_eq!(MAGIC, 0x7865_7450);
    }

    #[test]
    fn test_header_layout() {
        let header = sample_header();
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(&bytes[0..4], b"Ptex");
        assert_eq!(Header::parse(&bytes).unwrap(), header);
        assert_eq!(header.pixel_size(), Some(12));
    }

    #[test]
    fn test_short_ext_header_zero_fills() {
        let ext = ExtHeader::parse(&[2, 0, 0, 0]).unwrap();
        assert_eq!(ext.u_border_mode, 2);
        assert_eq!(ext.edit_data_pos, 0);
        assert_eq!(BorderMode::from_u32(ext.u_border_mode), BorderMode::Periodic);
    }

    #[test]
    fn test_res_dimensions() {
        let res = Res::new(3, 1);
        assert_eq!(res.u(), 8);
        assert_eq!(res.v(), 2);
        assert_eq!(res.size(), 16);
        assert_eq!(res.swapped(), Res::new(1, 3));
        assert_eq!(res.ntiles(Res::new(1, 1)), 4);
        assert!(res.covers(&Res::new(2, 1)));
        assert!(!res.covers(&Res::new(2, 2)));
    }

    #[test]
    fn test_half_level_res_keeps_one_texel() {
        let res = Res::new(-1, 3);
        assert!(!res.is_whole());
        assert_eq!(res.u(), 1);
        assert_eq!(res.size(), 8);
        assert_ne!(res.val(), Res::new(1, 3).val());
    }

    #[test]
    fn test_extreme_res_saturates() {
        let huge = Res::new(i8::MAX, 70);
        assert_eq!(huge.u(), 1 << Res::MAX_LOG2);
        assert_eq!(huge.v(), 1 << Res::MAX_LOG2);
        assert_eq!(huge.size(), huge.u() * huge.v());
        assert!(!huge.is_storable());

        let tiny = Res::new(i8::MIN, i8::MIN);
        assert_eq!(tiny.size(), 1);
        assert!(!tiny.is_storable());
        assert_eq!(tiny.ntiles(huge), 1);
        assert_eq!(huge.ntiles_u(tiny), 1 << Res::MAX_LOG2);
        assert!(Res::new(Res::MAX_LOG2, 0).is_storable());
    }

    #[test]
    fn test_face_info_adjacency() {
        let mut info = FaceInfo::new(Res::new(4, 4));
        info.set_adjacent(EDGE_RIGHT, 7, EDGE_LEFT);
        info.set_adjacent(EDGE_TOP, 2, EDGE_BOTTOM);
        assert_eq!(info.adj_face(EDGE_RIGHT), 7);
        assert_eq!(info.adj_edge(EDGE_RIGHT), EDGE_LEFT);
        assert_eq!(info.adj_edge(EDGE_TOP), EDGE_BOTTOM);
        assert_eq!(info.adj_face(EDGE_BOTTOM), -1);

        let mut bytes = Vec::new();
        info.write(&mut bytes);
        assert_eq!(bytes.len(), FACE_INFO_SIZE);
        let parsed = FaceInfo::parse(&mut LeCursor::new(&bytes)).unwrap();
        assert_eq!(parsed, info);
    }

    #[test]
    fn test_face_data_header_packing() {
        let fdh = FaceDataHeader::new(12345, Encoding::DiffZipped);
        assert_eq!(fdh.block_size(), 12345);
        assert_eq!(fdh.encoding(), Encoding::DiffZipped);
        assert_eq!(FaceDataHeader::new(0, Encoding::Tiled).encoding(), Encoding::Tiled);
    }

    #[test]
    fn test_compute_offsets() {
        let headers = [
            FaceDataHeader::new(10, Encoding::Zipped),
            FaceDataHeader::new(0, Encoding::Constant),
            FaceDataHeader::new(5, Encoding::Zipped),
        ];
        assert_eq!(compute_offsets(100, &headers), vec![100, 110, 110]);
    }

    #[test]
    fn test_cursor_rejects_short_record() {
        let mut c = LeCursor::new(&[1, 2, 3]);
        assert!(c.u32().is_err());
    }
}
