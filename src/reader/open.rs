//! File open and section parsing

use std::cmp::Reverse;
use std::sync::atomic::AtomicBool;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{FaceEdit, MetaEdit, ReaderInner, ReaderMetrics, Sections};
use crate::compression::MAX_INFLATE_RATIO;
use crate::error::{Error, Result};
use crate::format::{
    DataType, EditFaceDataHeader, EditMetaDataHeader, EditType, ExtHeader, FaceInfo, Header,
    LeCursor, LevelInfo, MeshType, Res, EDIT_FACE_DATA_HEADER_SIZE, EDIT_META_DATA_HEADER_SIZE,
    EXT_HEADER_SIZE, FACE_INFO_SIZE, HEADER_SIZE, LEVEL_INFO_SIZE, MAGIC, METADATA_BARRIER_SIZE,
    VERSION,
};
use crate::io::{BlockReader, InputStream};

/// Size of an edit record prefix: type tag plus payload size
const EDIT_PREFIX_SIZE: usize = 5;

/// Full resolution plus one level per halving down to a single texel
const MAX_LEVELS: u16 = Res::MAX_LOG2 as u16 + 1;

impl ReaderInner {
    /// Parse a texture file from an open stream
    pub(crate) fn open(path: &str, stream: Box<dyn InputStream>) -> Result<Self> {
        if cfg!(target_endian = "big") {
            return Err(Error::UnsupportedEndianness);
        }

        let metrics = ReaderMetrics::default();
        let mut io = BlockReader::new(stream)?;

        let header = read_header(&mut io)?;
        let mesh_type = MeshType::from_u32(header.mesh_type).ok_or_else(|| {
            Error::InvalidHeader(format!("unknown mesh type {}", header.mesh_type))
        })?;
        let data_type = DataType::from_u32(header.data_type).ok_or_else(|| {
            Error::InvalidHeader(format!("unknown data type {}", header.data_type))
        })?;
        validate_header(&header)?;
        let pixel_size = data_type.size() * header.nchannels as usize;

        let ext_len = (header.ext_header_size as usize).min(EXT_HEADER_SIZE);
        let ext = ExtHeader::parse(&io.read_at(HEADER_SIZE as u64, ext_len)?)?;
        let sections = compute_sections(&header, &ext);

        let nfaces = header.nfaces as usize;
        let face_table = read_zipped(
            &mut io,
            &metrics,
            sections.face_info_pos,
            header.face_info_size as usize,
            nfaces * FACE_INFO_SIZE,
        )?;
        let mut cursor = LeCursor::new(&face_table);
        let mut face_info = (0..nfaces)
            .map(|_| FaceInfo::parse(&mut cursor))
            .collect::<Result<Vec<_>>>()?;
        for (face_id, info) in face_info.iter().enumerate() {
            check_face_res(face_id, info)?;
        }
        let rface_ids = resolution_order(&face_info);

        let mut const_data = read_zipped(
            &mut io,
            &metrics,
            sections.const_data_pos,
            header.const_data_size as usize,
            nfaces * pixel_size,
        )?;

        let nlevels = header.nlevels as usize;
        let level_table = io.read_at(sections.level_info_pos, nlevels * LEVEL_INFO_SIZE)?;
        metrics.record_read(level_table.len());
        let mut cursor = LeCursor::new(&level_table);
        let level_info = (0..nlevels)
            .map(|_| LevelInfo::parse(&mut cursor))
            .collect::<Result<Vec<_>>>()?;
        let mut level_pos = Vec::with_capacity(nlevels);
        let mut pos = sections.level_data_pos;
        for info in &level_info {
            level_pos.push(pos);
            pos += info.level_data_size;
        }

        let edits = read_edits(
            &mut io,
            &metrics,
            &ext,
            sections.edit_data_pos,
            pixel_size,
            &mut face_info,
            &mut const_data,
        )?;

        debug!(
            path,
            mesh = %mesh_type,
            data = %data_type,
            channels = header.nchannels,
            faces = header.nfaces,
            levels = header.nlevels,
            edits = edits.found,
            "Parsed texture header"
        );

        Ok(Self {
            path: path.to_string(),
            header,
            ext,
            mesh_type,
            data_type,
            pixel_size,
            sections,
            face_info,
            rface_ids,
            const_data,
            level_info,
            level_pos,
            face_edits: edits.faces,
            meta_edits: edits.meta,
            has_edits: edits.found,
            read_lock: Mutex::new(io),
            reduce_lock: Mutex::new(()),
            failed: AtomicBool::new(false),
            last_error: Mutex::new(None),
            metrics,
        })
    }
}

// =============================================================================
// Header
// =============================================================================

fn read_header(io: &mut BlockReader) -> Result<Header> {
    let avail = io.len().min(HEADER_SIZE as u64) as usize;
    let bytes = io.read_at(0, avail)?;
    if bytes.len() >= 4 {
        let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if magic != MAGIC {
            return Err(Error::BadMagic(magic));
        }
    }
    if bytes.len() < HEADER_SIZE {
        return Err(Error::Truncated {
            pos: bytes.len() as u64,
        });
    }
    let header = Header::parse(&bytes)?;
    if header.version != VERSION {
        return Err(Error::UnsupportedVersion(header.version));
    }
    Ok(header)
}

fn validate_header(header: &Header) -> Result<()> {
    if header.nchannels == 0 {
        return Err(Error::InvalidHeader("texture has no channels".into()));
    }
    if header.alpha_chan >= header.nchannels as i32 || header.alpha_chan < -1 {
        return Err(Error::InvalidHeader(format!(
            "alpha channel {} out of range for {} channels",
            header.alpha_chan, header.nchannels
        )));
    }
    if header.nlevels == 0 && header.nfaces > 0 {
        return Err(Error::InvalidHeader("texture has faces but no levels".into()));
    }
    if header.nlevels > MAX_LEVELS {
        return Err(Error::InvalidHeader(format!(
            "{} levels exceed the {} a face can reduce through",
            header.nlevels, MAX_LEVELS
        )));
    }
    let face_table = header.nfaces as u64 * FACE_INFO_SIZE as u64;
    if face_table > header.face_info_size as u64 * MAX_INFLATE_RATIO as u64 {
        return Err(Error::InvalidHeader(format!(
            "face table of {} bytes cannot hold {} faces",
            header.face_info_size, header.nfaces
        )));
    }
    if header.level_info_size as usize != header.nlevels as usize * LEVEL_INFO_SIZE {
        return Err(Error::InvalidHeader(format!(
            "level table of {} bytes does not hold {} levels",
            header.level_info_size, header.nlevels
        )));
    }
    Ok(())
}

/// Reject face resolutions outside the storable range
fn check_face_res(face_id: usize, info: &FaceInfo) -> Result<()> {
    if info.res.is_storable() {
        return Ok(());
    }
    Err(Error::CorruptData(format!(
        "face {} has resolution log2 ({}, {})",
        face_id, info.res.ulog2, info.res.vlog2
    )))
}

/// Section offsets, summed in file order
pub(crate) fn compute_sections(header: &Header, ext: &ExtHeader) -> Sections {
    let mut pos = HEADER_SIZE as u64 + header.ext_header_size as u64;
    let face_info_pos = pos;
    pos += header.face_info_size as u64;
    let const_data_pos = pos;
    pos += header.const_data_size as u64;
    let level_info_pos = pos;
    pos += header.level_info_size as u64;
    let level_data_pos = pos;
    pos += header.level_data_size;
    let metadata_pos = pos;
    pos += header.metadata_zip_size as u64;
    pos += METADATA_BARRIER_SIZE;
    let lmd_header_pos = pos;
    pos += ext.lmd_header_zip_size as u64;
    let lmd_data_pos = pos;
    pos += ext.lmd_data_size;

    Sections {
        face_info_pos,
        const_data_pos,
        level_info_pos,
        level_data_pos,
        metadata_pos,
        lmd_header_pos,
        lmd_data_pos,
        edit_data_pos: pos.max(ext.edit_data_pos),
    }
}

pub(crate) fn read_zipped(
    io: &mut BlockReader,
    metrics: &ReaderMetrics,
    pos: u64,
    zip_size: usize,
    mem_size: usize,
) -> Result<Vec<u8>> {
    if mem_size == 0 {
        return Ok(Vec::new());
    }
    metrics.record_read(zip_size);
    io.read_zipped(pos, zip_size, mem_size)
}

/// Stable descending sort of faces by smaller log2 resolution
///
/// Constant faces rank as if their smaller side were 2 texels, matching
/// the single reduced level stored for them.
pub(crate) fn resolution_order(faces: &[FaceInfo]) -> Vec<u32> {
    let min_res = |f: &FaceInfo| -> i8 {
        if f.is_constant() {
            1
        } else {
            f.res.ulog2.min(f.res.vlog2)
        }
    };
    let mut by_res: Vec<u32> = (0..faces.len() as u32).collect();
    by_res.sort_by_key(|&f| Reverse(min_res(&faces[f as usize])));

    let mut rface_ids = vec![0u32; faces.len()];
    for (rank, &face) in by_res.iter().enumerate() {
        rface_ids[face as usize] = rank as u32;
    }
    rface_ids
}

// =============================================================================
// Edit Records
// =============================================================================

struct Edits {
    found: bool,
    faces: Vec<FaceEdit>,
    meta: Vec<MetaEdit>,
}

/// Scan `{type, size, payload}` records, applying face and metadata edits
///
/// Unknown record types are skipped by size. Scanning stops at the end of
/// the edit section, at end of file, or at a zero-sized record.
fn read_edits(
    io: &mut BlockReader,
    metrics: &ReaderMetrics,
    ext: &ExtHeader,
    start: u64,
    pixel_size: usize,
    face_info: &mut [FaceInfo],
    const_data: &mut [u8],
) -> Result<Edits> {
    let mut edits = Edits {
        found: false,
        faces: Vec::new(),
        meta: Vec::new(),
    };

    let end = if ext.edit_data_pos > 0 {
        start.saturating_add(ext.edit_data_size)
    } else {
        io.len()
    };

    let mut pos = start;
    while pos < end {
        if pos + EDIT_PREFIX_SIZE as u64 > io.len() {
            break;
        }
        let prefix = io.read_at(pos, EDIT_PREFIX_SIZE)?;
        let edit_type = prefix[0];
        let size = u32::from_le_bytes([prefix[1], prefix[2], prefix[3], prefix[4]]);
        if size == 0 {
            break;
        }
        edits.found = true;
        let body = pos + EDIT_PREFIX_SIZE as u64;
        pos = body + size as u64;

        match EditType::from_u8(edit_type) {
            Some(EditType::FaceData) => {
                let raw = io.read_at(body, EDIT_FACE_DATA_HEADER_SIZE)?;
                metrics.record_read(raw.len());
                let edh = EditFaceDataHeader::parse(&raw)?;
                let face_id = edh.face_id as usize;
                if face_id >= face_info.len() {
                    return Err(Error::CorruptData(format!(
                        "face edit for face {} of {}",
                        face_id,
                        face_info.len()
                    )));
                }

                let mut info = edh.face_info;
                check_face_res(face_id, &info)?;
                info.flags |= FaceInfo::FLAG_HAS_EDITS;
                face_info[face_id] = info;

                let pixel = io.read_next(pixel_size)?;
                const_data[face_id * pixel_size..(face_id + 1) * pixel_size]
                    .copy_from_slice(&pixel);

                if !info.is_constant() {
                    edits.faces.push(FaceEdit {
                        pos: io.tell(),
                        face_id: edh.face_id,
                        fdh: edh.fdh,
                    });
                }
            }
            Some(EditType::MetaData) => {
                let raw = io.read_at(body, EDIT_META_DATA_HEADER_SIZE)?;
                let emh = EditMetaDataHeader::parse(&raw)?;
                edits.meta.push(MetaEdit {
                    pos: body + EDIT_META_DATA_HEADER_SIZE as u64,
                    zip_size: emh.zip_size,
                    mem_size: emh.mem_size,
                });
            }
            None => {
                warn!(edit_type, size, "Skipping unknown edit record");
            }
        }
    }

    Ok(edits)
}

// =============================================================================
// Tests
// =============================================================================
