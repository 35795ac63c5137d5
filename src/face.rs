//! Face Data
//!
//! A face's pixels take one of four shapes:
//!
//! | Variant        | Storage                                               |
//! |----------------|-------------------------------------------------------|
//! | `Constant`     | one pixel                                             |
//! | `Packed`       | interleaved pixel rectangle                           |
//! | `Tiled`        | directory of on-disk tiles, each loaded on demand     |
//! | `ReducedTiled` | tiles synthesized on demand from a parent tiled block |
//!
//! Reductions of tiled faces stay tiled: each reduced tile is built from
//! the group of parent tiles it covers, so a large face is never
//! flattened just to be reduced. Triangle faces are the exception, since
//! their filter reads texels mirrored across the diagonal.

use std::sync::Arc;

use bytes::Bytes;

use crate::cache::state::{ObjectId, Payload, Slot};
use crate::cache::{Built, CacheShared, Handle};
use crate::error::{Error, Result};
use crate::format::{FaceDataHeader, Res};
use crate::pixel;
use crate::reader::ReaderInner;

// =============================================================================
// Reduce Kinds
// =============================================================================

/// Box filter applied by one reduction step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReduceKind {
    /// 2x2 box
    Both,
    /// 2x1 box along u
    U,
    /// 1x2 box along v
    V,
    /// 2x2 triangle fold
    Triangle,
}

impl ReduceKind {
    pub(crate) fn reduces_u(self) -> bool {
        !matches!(self, ReduceKind::V)
    }

    pub(crate) fn reduces_v(self) -> bool {
        !matches!(self, ReduceKind::U)
    }

    /// Resolution after one step
    pub(crate) fn target(self, res: Res) -> Res {
        Res::new(
            res.ulog2 - self.reduces_u() as i8,
            res.vlog2 - self.reduces_v() as i8,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn apply(
        self,
        src: &[u8],
        sstride: usize,
        uw: usize,
        vw: usize,
        dst: &mut [u8],
        dstride: usize,
        reader: &ReaderInner,
    ) {
        let dt = reader.data_type;
        let nchan = reader.num_channels();
        match self {
            ReduceKind::Both => pixel::reduce(src, sstride, uw, vw, dst, dstride, dt, nchan),
            ReduceKind::U => pixel::reduce_u(src, sstride, uw, vw, dst, dstride, dt, nchan),
            ReduceKind::V => pixel::reduce_v(src, sstride, uw, vw, dst, dstride, dt, nchan),
            ReduceKind::Triangle => pixel::reduce_tri(src, sstride, uw, dst, dstride, dt, nchan),
        }
    }
}

// =============================================================================
// Face Blocks
// =============================================================================

/// Tile grid of a tiled block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TileLayout {
    pub tile_res: Res,
    pub ntiles_u: usize,
    pub ntiles_v: usize,
}

impl TileLayout {
    pub(crate) fn new(res: Res, tile_res: Res) -> Self {
        Self {
            tile_res,
            ntiles_u: res.ntiles_u(tile_res),
            ntiles_v: res.ntiles_v(tile_res),
        }
    }

    pub(crate) fn num_tiles(&self) -> usize {
        self.ntiles_u * self.ntiles_v
    }
}

/// On-disk tiled block
pub(crate) struct TiledFace {
    pub reader: Arc<ReaderInner>,
    pub res: Res,
    pub layout: TileLayout,
    pub headers: Vec<FaceDataHeader>,
    pub offsets: Vec<u64>,
}

/// Tiled reduction whose tiles derive from a pinned parent block
pub(crate) struct ReducedTiledFace {
    pub reader: Arc<ReaderInner>,
    pub res: Res,
    pub layout: TileLayout,
    pub parent_id: ObjectId,
    pub parent: Arc<FaceBlock>,
    pub kind: ReduceKind,
}

pub(crate) enum FaceBlock {
    Constant(Bytes),
    Packed { res: Res, data: Bytes },
    Tiled(TiledFace),
    ReducedTiled(ReducedTiledFace),
}

impl FaceBlock {
    pub(crate) fn res(&self) -> Res {
        match self {
            FaceBlock::Constant(_) => Res::new(0, 0),
            FaceBlock::Packed { res, .. } => *res,
            FaceBlock::Tiled(t) => t.res,
            FaceBlock::ReducedTiled(r) => r.res,
        }
    }

    pub(crate) fn layout(&self) -> Option<TileLayout> {
        match self {
            FaceBlock::Tiled(t) => Some(t.layout),
            FaceBlock::ReducedTiled(r) => Some(r.layout),
            _ => None,
        }
    }

    /// Bytes charged against the cache's memory budget
    pub(crate) fn memory_size(&self) -> usize {
        let base = std::mem::size_of::<FaceBlock>();
        match self {
            FaceBlock::Constant(pixel) => base + pixel.len(),
            FaceBlock::Packed { data, .. } => base + data.len(),
            FaceBlock::Tiled(t) => base + t.headers.len() * 12,
            FaceBlock::ReducedTiled(_) => base,
        }
    }
}

// =============================================================================
// FaceData Handle
// =============================================================================

/// Counted handle on a face's pixels at one resolution
///
/// Cloning adds a reference; dropping or [`FaceData::release`] removes it.
#[derive(Clone)]
pub struct FaceData {
    handle: Option<Handle>,
    block: Arc<FaceBlock>,
    pixel_size: usize,
}

impl FaceData {
    pub(crate) fn tracked(handle: Handle, block: Arc<FaceBlock>, pixel_size: usize) -> Self {
        Self {
            handle: Some(handle),
            block,
            pixel_size,
        }
    }

    /// Constant pixel owned by the reader's constant table
    pub(crate) fn untracked(pixel: &[u8]) -> Self {
        Self {
            handle: None,
            pixel_size: pixel.len(),
            block: Arc::new(FaceBlock::Constant(Bytes::copy_from_slice(pixel))),
        }
    }

    fn from_payload(handle: Handle, payload: Payload, pixel_size: usize) -> Result<Self> {
        Ok(Self::tracked(handle, payload.into_face()?, pixel_size))
    }

    /// Release this reference
    pub fn release(self) {}

    pub fn is_constant(&self) -> bool {
        matches!(*self.block, FaceBlock::Constant(_))
    }

    pub fn is_tiled(&self) -> bool {
        self.block.layout().is_some()
    }

    /// Stored resolution; constant data reports a single texel
    pub fn res(&self) -> Res {
        self.block.res()
    }

    pub fn pixel_size(&self) -> usize {
        self.pixel_size
    }

    /// Raw interleaved pixels of untiled data (one pixel when constant)
    pub fn data(&self) -> Option<&[u8]> {
        match &*self.block {
            FaceBlock::Constant(pixel) => Some(pixel),
            FaceBlock::Packed { data, .. } => Some(data),
            _ => None,
        }
    }

    /// Resolution of each tile; untiled data is a single tile
    pub fn tile_res(&self) -> Res {
        self.block
            .layout()
            .map(|l| l.tile_res)
            .unwrap_or_else(|| self.res())
    }

    pub fn num_tiles(&self) -> usize {
        self.block.layout().map(|l| l.num_tiles()).unwrap_or(1)
    }

    /// Tile `index`, loaded or synthesized on first use
    pub fn tile(&self, index: usize) -> Result<FaceData> {
        match (&*self.block, &self.handle) {
            (FaceBlock::Tiled(_) | FaceBlock::ReducedTiled(_), Some(handle)) => load_tile(
                handle.shared(),
                handle.id(),
                &self.block,
                index,
                self.pixel_size,
            ),
            (FaceBlock::Tiled(_) | FaceBlock::ReducedTiled(_), None) => Err(Error::CorruptData(
                "tiled data without a cache handle".into(),
            )),
            _ if index == 0 => Ok(self.clone()),
            _ => Err(Error::TileOutOfRange {
                index,
                num_tiles: 1,
            }),
        }
    }

    /// Copy of the pixel at texel (`u`, `v`)
    pub fn pixel(&self, u: usize, v: usize) -> Result<Vec<u8>> {
        let res = self.res();
        if let FaceBlock::Constant(pixel) = &*self.block {
            return Ok(pixel.to_vec());
        }
        if u >= res.u() || v >= res.v() {
            return Err(Error::PixelOutOfRange {
                u,
                v,
                ures: res.u(),
                vres: res.v(),
            });
        }
        match &*self.block {
            FaceBlock::Packed { data, .. } => {
                let off = (v * res.u() + u) * self.pixel_size;
                Ok(data[off..off + self.pixel_size].to_vec())
            }
            _ => {
                let tile_res = self.tile_res();
                let ntiles_u = res.ntiles_u(tile_res);
                let index = (v >> tile_res.vlog2) * ntiles_u + (u >> tile_res.ulog2);
                let tile = self.tile(index)?;
                tile.pixel(u & (tile_res.u() - 1), v & (tile_res.v() - 1))
            }
        }
    }

    /// Contiguous interleaved copy of the whole face at its resolution
    pub fn flatten(&self) -> Result<Bytes> {
        match &*self.block {
            FaceBlock::Constant(pixel) => Ok(pixel.clone()),
            FaceBlock::Packed { data, .. } => Ok(data.clone()),
            _ => {
                let layout = self.block.layout().ok_or_else(|| {
                    Error::CorruptData("tiled block without a tile layout".into())
                })?;
                let tiles = self.all_tiles()?;
                assemble(&tiles, self.res(), layout, self.pixel_size).map(Bytes::from)
            }
        }
    }

    /// Every tile in row-major order
    pub(crate) fn all_tiles(&self) -> Result<Vec<FaceData>> {
        (0..self.num_tiles()).map(|i| self.tile(i)).collect()
    }

    /// Pixels expanded to `npixels`; constant data is replicated
    pub(crate) fn expand(&self, npixels: usize) -> Result<Vec<u8>> {
        if let FaceBlock::Constant(pixel) = &*self.block {
            return Ok(pixel.repeat(npixels));
        }
        let data = self.flatten()?;
        if data.len() != npixels * self.pixel_size {
            return Err(Error::CorruptData(format!(
                "face holds {} bytes, expected {} pixels",
                data.len(),
                npixels
            )));
        }
        Ok(data.to_vec())
    }

    fn id(&self) -> Option<ObjectId> {
        self.handle.as_ref().map(|h| h.id())
    }
}

impl std::fmt::Debug for FaceData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &*self.block {
            FaceBlock::Constant(_) => "constant",
            FaceBlock::Packed { .. } => "packed",
            FaceBlock::Tiled(_) => "tiled",
            FaceBlock::ReducedTiled(_) => "reduced-tiled",
        };
        f.debug_struct("FaceData")
            .field("kind", &kind)
            .field("res", &self.res())
            .field("handle", &self.handle)
            .finish()
    }
}

// =============================================================================
// Tiles
// =============================================================================

/// Load or synthesize tile `index` of the tiled block `block_id`
pub(crate) fn load_tile(
    shared: &Arc<CacheShared>,
    block_id: ObjectId,
    block: &Arc<FaceBlock>,
    index: usize,
    pixel_size: usize,
) -> Result<FaceData> {
    let layout = block
        .layout()
        .ok_or_else(|| Error::CorruptData("tile requested from untiled block".into()))?;
    if index >= layout.num_tiles() {
        return Err(Error::TileOutOfRange {
            index,
            num_tiles: layout.num_tiles(),
        });
    }

    let slot = Slot::Tile(index as u32);
    if let Some((handle, payload)) = shared.acquire(block_id, slot) {
        return FaceData::from_payload(handle, payload, pixel_size);
    }

    let (handle, payload) = match &**block {
        FaceBlock::Tiled(t) => {
            let reader = &t.reader;
            reader.ensure_ok()?;
            shared.build_gated(block_id, slot, &reader.read_lock, |io| {
                let tile = reader.track(reader.read_block(
                    io,
                    t.offsets[index],
                    t.headers[index],
                    layout.tile_res,
                    false,
                ))?;
                reader.metrics.record_tile_load();
                let size = tile.memory_size();
                Ok(Built::new(Payload::Face(Arc::new(tile)), size))
            })?
        }
        FaceBlock::ReducedTiled(r) => {
            let parent_layout = r.parent.layout().ok_or_else(|| {
                Error::CorruptData("reduced tiles without a tiled parent".into())
            })?;
            let nu = parent_layout.ntiles_u / layout.ntiles_u;
            let nv = parent_layout.ntiles_v / layout.ntiles_v;
            let first = (index / layout.ntiles_u) * nv * parent_layout.ntiles_u
                + (index % layout.ntiles_u) * nu;

            // Parent tiles are fetched before the reduce lock; fetching may
            // itself synthesize reduced tiles.
            let mut group = Vec::with_capacity(nu * nv);
            for gy in 0..nv {
                for gx in 0..nu {
                    let parent_index = first + gy * parent_layout.ntiles_u + gx;
                    group.push(load_tile(
                        shared,
                        r.parent_id,
                        &r.parent,
                        parent_index,
                        pixel_size,
                    )?);
                }
            }

            let reader = &r.reader;
            shared.build_gated(block_id, slot, &reader.reduce_lock, |_| {
                let tile = reduce_tile_group(
                    &group,
                    nu,
                    parent_layout.tile_res,
                    layout.tile_res,
                    r.kind,
                    reader,
                )?;
                let size = tile.memory_size();
                Ok(Built::new(Payload::Face(Arc::new(tile)), size))
            })?
        }
        _ => {
            return Err(Error::CorruptData(
                "tile requested from untiled block".into(),
            ))
        }
    };
    FaceData::from_payload(handle, payload, pixel_size)
}

/// Reduce a row-major `nu`-wide group of tiles into one block of `out_res`
fn reduce_tile_group(
    tiles: &[FaceData],
    nu: usize,
    tile_res: Res,
    out_res: Res,
    kind: ReduceKind,
    reader: &ReaderInner,
) -> Result<FaceBlock> {
    if let Some(first) = tiles.first().and_then(|t| match &*t.block {
        FaceBlock::Constant(p) => Some(p),
        _ => None,
    }) {
        let uniform = tiles
            .iter()
            .all(|t| matches!(&*t.block, FaceBlock::Constant(p) if p == first));
        if uniform {
            return Ok(FaceBlock::Constant(first.clone()));
        }
    }

    let ps = reader.pixel_size;
    let sub = kind.target(tile_res);
    let rowlen = out_res.u() * ps;
    let mut out = vec![0u8; out_res.size() * ps];
    for (i, tile) in tiles.iter().enumerate() {
        let off = (i / nu) * sub.v() * rowlen + (i % nu) * sub.u() * ps;
        match &*tile.block {
            FaceBlock::Constant(p) => pixel::fill(p, &mut out[off..], rowlen, sub.u(), sub.v()),
            FaceBlock::Packed { data, .. } => kind.apply(
                data,
                tile_res.u() * ps,
                tile_res.u(),
                tile_res.v(),
                &mut out[off..],
                rowlen,
                reader,
            ),
            _ => return Err(Error::CorruptData("nested tiled block".into())),
        }
    }
    reader.metrics.record_reduction();
    Ok(FaceBlock::Packed {
        res: out_res,
        data: Bytes::from(out),
    })
}

/// Assemble row-major tiles into one interleaved buffer
fn assemble(tiles: &[FaceData], res: Res, layout: TileLayout, ps: usize) -> Result<Vec<u8>> {
    let rowlen = res.u() * ps;
    let tile_u = layout.tile_res.u();
    let tile_v = layout.tile_res.v();
    let mut out = vec![0u8; res.size() * ps];
    for (i, tile) in tiles.iter().enumerate() {
        let off = (i / layout.ntiles_u) * tile_v * rowlen + (i % layout.ntiles_u) * tile_u * ps;
        match &*tile.block {
            FaceBlock::Constant(p) => pixel::fill(p, &mut out[off..], rowlen, tile_u, tile_v),
            FaceBlock::Packed { data, .. } => {
                pixel::copy(data, tile_u * ps, &mut out[off..], rowlen, tile_v, tile_u * ps)
            }
            _ => return Err(Error::CorruptData("nested tiled block".into())),
        }
    }
    Ok(out)
}

// =============================================================================
// Reduction Planning
// =============================================================================

enum Step {
    Constant(Bytes),
    Packed { res: Res, data: Bytes },
    /// Assemble all tiles, then reduce the whole face
    Flatten(Vec<FaceData>, TileLayout),
    /// Reduce every tile into one block
    Merge(Vec<FaceData>, TileLayout),
    /// Publish a reduced tiled block over the source
    Lazy(TileLayout),
}

/// A reduction whose inputs are fetched and that is ready to build
pub(crate) struct ReductionPlan {
    reader: Arc<ReaderInner>,
    kind: ReduceKind,
    res: Res,
    src: FaceData,
    step: Step,
}

impl ReductionPlan {
    /// Fetch whatever the reduction of `src` by `kind` needs
    ///
    /// Runs without the reduce lock: loading tiles may recurse into other
    /// reductions.
    pub(crate) fn prepare(src: FaceData, kind: ReduceKind, reader: Arc<ReaderInner>) -> Result<Self> {
        let res = kind.target(src.res());
        let step = match &*src.block {
            FaceBlock::Constant(pixel) => Step::Constant(pixel.clone()),
            FaceBlock::Packed { res, data } => Step::Packed {
                res: *res,
                data: data.clone(),
            },
            FaceBlock::Tiled(_) | FaceBlock::ReducedTiled(_) => {
                let layout = src.block.layout().ok_or_else(|| {
                    Error::CorruptData("tiled block without a tile layout".into())
                })?;
                let thin = (kind.reduces_u() && layout.tile_res.ulog2 < 1)
                    || (kind.reduces_v() && layout.tile_res.vlog2 < 1);
                if kind == ReduceKind::Triangle || thin {
                    Step::Flatten(src.all_tiles()?, layout)
                } else {
                    let new_tile_res = if res.ulog2 <= 1 || res.vlog2 <= 1 {
                        res
                    } else {
                        Res::new(
                            layout.tile_res.ulog2.min(res.ulog2),
                            layout.tile_res.vlog2.min(res.vlog2),
                        )
                    };
                    let new_layout = TileLayout::new(res, new_tile_res);
                    if new_layout.num_tiles() == 1 {
                        Step::Merge(src.all_tiles()?, layout)
                    } else {
                        Step::Lazy(new_layout)
                    }
                }
            }
        };
        Ok(Self {
            reader,
            kind,
            res,
            src,
            step,
        })
    }

    /// Compute the reduced block
    pub(crate) fn build(self) -> Result<Built> {
        let reader = &self.reader;
        let ps = reader.pixel_size;
        let block = match self.step {
            Step::Constant(pixel) => FaceBlock::Constant(pixel),
            Step::Packed { res, data } => reduce_packed(&data, res, self.kind, reader),
            Step::Flatten(tiles, layout) => {
                let data = assemble(&tiles, self.src.res(), layout, ps)?;
                reduce_packed(&data, self.src.res(), self.kind, reader)
            }
            Step::Merge(tiles, layout) => reduce_tile_group(
                &tiles,
                layout.ntiles_u,
                layout.tile_res,
                self.res,
                self.kind,
                reader,
            )?,
            Step::Lazy(layout) => {
                let parent_id = self.src.id().ok_or_else(|| {
                    Error::CorruptData("tiled data without a cache handle".into())
                })?;
                let block = FaceBlock::ReducedTiled(ReducedTiledFace {
                    reader: reader.clone(),
                    res: self.res,
                    layout,
                    parent_id,
                    parent: self.src.block.clone(),
                    kind: self.kind,
                });
                reader.metrics.record_reduction();
                let size = block.memory_size();
                return Ok(Built::new(Payload::Face(Arc::new(block)), size).pinning(vec![parent_id]));
            }
        };
        let size = block.memory_size();
        Ok(Built::new(Payload::Face(Arc::new(block)), size))
    }
}

fn reduce_packed(data: &[u8], res: Res, kind: ReduceKind, reader: &ReaderInner) -> FaceBlock {
    let ps = reader.pixel_size;
    let out_res = kind.target(res);
    let mut out = vec![0u8; out_res.size() * ps];
    kind.apply(
        data,
        res.u() * ps,
        res.u(),
        res.v(),
        &mut out,
        out_res.u() * ps,
        reader,
    );
    reader.metrics.record_reduction();
    FaceBlock::Packed {
        res: out_res,
        data: Bytes::from(out),
    }
}

// =============================================================================
// Blending
// =============================================================================

/// Average `length`-pixel sources with equal weights into a half-level block
///
/// Each source is added with weight `1 / sources.len()`; flipped sources
/// are added in reverse pixel order.
pub(crate) fn blend_sources(
    sources: &[(Vec<u8>, bool)],
    length: usize,
    res: Res,
    reader: &ReaderInner,
) -> FaceBlock {
    let ps = reader.pixel_size;
    if let [(only, _)] = sources {
        if length == 1 {
            return FaceBlock::Constant(Bytes::copy_from_slice(only));
        }
    }
    let weight = 1.0 / sources.len() as f32;
    let mut out = vec![0u8; length * ps];
    for (data, flip) in sources {
        pixel::blend(
            data,
            weight,
            &mut out,
            *flip,
            length,
            reader.data_type,
            reader.num_channels(),
        );
    }
    reader.metrics.record_blend();
    FaceBlock::Packed {
        res,
        data: Bytes::from(out),
    }
}

// =============================================================================
// Tests
// =============================================================================
