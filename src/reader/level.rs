//! Stored levels and on-disk block decoding

use std::sync::Arc;

use bytes::Bytes;

use super::open::read_zipped;
use super::{Reader, ReaderInner};
use crate::cache::state::{Payload, Slot};
use crate::cache::{Built, Handle};
use crate::error::{Error, Result};
use crate::face::{FaceBlock, FaceData, TileLayout, TiledFace};
use crate::format::{compute_offsets, Encoding, FaceDataHeader, Res, FACE_DATA_HEADER_SIZE};
use crate::io::BlockReader;
use crate::pixel;

/// Tile resolution (2 bytes) plus tile header size (4 bytes)
const TILED_PREFIX_SIZE: usize = 6;

/// Block directory of one stored level
#[derive(Debug)]
pub(crate) struct Level {
    pub headers: Vec<FaceDataHeader>,
    pub offsets: Vec<u64>,
}

impl Level {
    pub(crate) fn memory_size(&self) -> usize {
        std::mem::size_of::<Level>() + self.headers.len() * (FACE_DATA_HEADER_SIZE + 8)
    }
}

impl ReaderInner {
    /// Read the block directory of level `index`
    ///
    /// Level 0 lists faces in face id order; reduced levels list the first
    /// `nfaces` faces in resolution order. Face edits replace level 0
    /// entries.
    pub(crate) fn read_level(&self, io: &mut BlockReader, index: usize) -> Result<Level> {
        let info = self.level_info.get(index).ok_or_else(|| {
            Error::CorruptData(format!("level {} of {}", index, self.level_info.len()))
        })?;
        let nfaces = info.nfaces as usize;
        let pos = self.level_pos[index];
        let raw = read_zipped(
            io,
            &self.metrics,
            pos,
            info.level_header_size as usize,
            nfaces * FACE_DATA_HEADER_SIZE,
        )?;
        let mut headers = FaceDataHeader::parse_all(&raw, nfaces)?;
        let mut offsets = compute_offsets(pos + info.level_header_size as u64, &headers);

        if index == 0 {
            for edit in &self.face_edits {
                let face = edit.face_id as usize;
                if face < headers.len() {
                    headers[face] = edit.fdh;
                    offsets[face] = edit.pos;
                }
            }
        }

        self.metrics.record_level_load();
        Ok(Level { headers, offsets })
    }

    /// Decode one face or tile block of resolution `res` at `pos`
    pub(crate) fn read_block(
        self: &Arc<Self>,
        io: &mut BlockReader,
        pos: u64,
        fdh: FaceDataHeader,
        res: Res,
        allow_tiled: bool,
    ) -> Result<FaceBlock> {
        let ps = self.pixel_size;
        match fdh.encoding() {
            Encoding::Constant => {
                let pixel = io.read_at(pos, ps)?;
                self.metrics.record_read(ps);
                Ok(FaceBlock::Constant(Bytes::from(pixel)))
            }
            encoding @ (Encoding::Zipped | Encoding::DiffZipped) => {
                let mem_size = res.size() * ps;
                let mut planar =
                    read_zipped(io, &self.metrics, pos, fdh.block_size() as usize, mem_size)?;
                if encoding == Encoding::DiffZipped {
                    pixel::decode_difference(&mut planar, self.data_type);
                }
                let mut data = vec![0u8; mem_size];
                pixel::interleave(
                    &planar,
                    res.u(),
                    res.v(),
                    &mut data,
                    self.data_type,
                    self.num_channels(),
                );
                Ok(FaceBlock::Packed {
                    res,
                    data: Bytes::from(data),
                })
            }
            Encoding::Tiled if allow_tiled => {
                let prefix = io.read_at(pos, TILED_PREFIX_SIZE)?;
                self.metrics.record_read(TILED_PREFIX_SIZE);
                let tile_res = Res::new(prefix[0] as i8, prefix[1] as i8);
                let header_size = u32::from_le_bytes([prefix[2], prefix[3], prefix[4], prefix[5]]);
                if !tile_res.is_whole() || !res.covers(&tile_res) {
                    return Err(Error::CorruptData(format!(
                        "tile resolution {:?} does not fit face resolution {:?}",
                        tile_res, res
                    )));
                }

                let layout = TileLayout::new(res, tile_res);
                let ntiles = layout.num_tiles();
                let raw = read_zipped(
                    io,
                    &self.metrics,
                    pos + TILED_PREFIX_SIZE as u64,
                    header_size as usize,
                    ntiles * FACE_DATA_HEADER_SIZE,
                )?;
                let headers = FaceDataHeader::parse_all(&raw, ntiles)?;
                let data_start = pos + TILED_PREFIX_SIZE as u64 + header_size as u64;
                let offsets = compute_offsets(data_start, &headers);

                Ok(FaceBlock::Tiled(TiledFace {
                    reader: self.clone(),
                    res,
                    layout,
                    headers,
                    offsets,
                }))
            }
            Encoding::Tiled => Err(Error::CorruptData("tile block is itself tiled".into())),
        }
    }
}

impl Reader {
    /// Reference stored level `index`, loading its directory on first use
    pub(crate) fn level(&self, index: usize) -> Result<(Handle, Arc<Level>)> {
        let shared = self.handle.shared();
        let file = self.handle.id();
        let slot = Slot::Level(index as u16);
        if let Some((handle, payload)) = shared.acquire(file, slot) {
            return Ok((handle, payload.into_level()?));
        }

        let inner = &self.inner;
        inner.ensure_ok()?;
        let (handle, payload) = shared.build_gated(file, slot, &inner.read_lock, |io| {
            let level = inner.track(inner.read_level(io, index))?;
            let size = level.memory_size();
            Ok(Built::new(Payload::Level(Arc::new(level)), size))
        })?;
        Ok((handle, payload.into_level()?))
    }

    /// Face block at position `index` of stored level `level_index`
    ///
    /// `face_id` names the face for resolution lookup; at reduced levels
    /// `index` is its resolution-ordered id.
    pub(crate) fn level_face(&self, level_index: usize, index: usize, face_id: u32) -> Result<FaceData> {
        let (level_handle, level) = self.level(level_index)?;
        let shared = self.handle.shared();
        let slot = Slot::Face(index as u32);
        let ps = self.inner.pixel_size;

        if let Some((handle, payload)) = shared.acquire(level_handle.id(), slot) {
            return Ok(FaceData::tracked(handle, payload.into_face()?, ps));
        }

        let (Some(&fdh), Some(&pos)) = (level.headers.get(index), level.offsets.get(index)) else {
            return Err(Error::CorruptData(format!(
                "face {} missing from level {}",
                index, level_index
            )));
        };
        let full = self.inner.face(face_id)?.res;
        let reduced = i8::try_from(level_index)
            .ok()
            .filter(|&r| r <= full.ulog2.min(full.vlog2))
            .ok_or_else(|| {
                Error::CorruptData(format!(
                    "level {} is below the smallest level of face {}",
                    level_index, face_id
                ))
            })?;
        let res = Res::new(full.ulog2 - reduced, full.vlog2 - reduced);

        let inner = &self.inner;
        inner.ensure_ok()?;
        let (handle, payload) =
            shared.build_gated(level_handle.id(), slot, &inner.read_lock, |io| {
                let block = inner.track(inner.read_block(io, pos, fdh, res, true))?;
                inner.metrics.record_face_load();
                let size = block.memory_size();
                Ok(Built::new(Payload::Face(Arc::new(block)), size))
            })?;
        drop(level_handle);
        Ok(FaceData::tracked(handle, payload.into_face()?, ps))
    }
}
