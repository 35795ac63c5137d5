//! Face data lookup, reduction and blending

use std::sync::Arc;

use tracing::warn;

use super::Reader;
use crate::cache::state::{Payload, Slot};
use crate::cache::Built;
use crate::error::{Error, Result};
use crate::face::{blend_sources, FaceData, ReduceKind, ReductionPlan};
use crate::format::{MeshType, Res, EDGE_BOTTOM, EDGE_LEFT, EDGE_RIGHT, EDGE_TOP};
use crate::pixel;

impl Reader {
    /// Face data at the face's full stored resolution
    pub fn face_data(&self, face_id: u32) -> Result<FaceData> {
        let res = self.inner.face(face_id)?.res;
        self.get_data(face_id, res)
    }

    /// Face data at resolution `res`
    ///
    /// Lookup order: constant table, level 0, stored mip level (symmetric
    /// reductions of unedited faces), reduction cache, then synthesis.
    /// Enlargements, reductions below a blended half level and anisotropic
    /// triangle reductions are rejected.
    pub fn get_data(&self, face_id: u32, res: Res) -> Result<FaceData> {
        let inner = &self.inner;
        inner.ensure_ok()?;
        let info = *inner.face(face_id)?;

        if (info.is_constant() && res.is_whole()) || res == Res::new(0, 0) {
            return Ok(FaceData::untracked(inner.const_pixel(face_id)));
        }

        let redu = i32::from(info.res.ulog2) - i32::from(res.ulog2);
        let redv = i32::from(info.res.vlog2) - i32::from(res.vlog2);
        if redu == 0 && redv == 0 {
            return self.level_face(0, face_id as usize, face_id);
        }

        if redu == redv && redu > 0 && !info.has_edits() && res.is_whole() {
            let level = redu as usize;
            if let Some(level_info) = inner.level_info.get(level) {
                let rface_id = inner.rface_ids[face_id as usize];
                if rface_id < level_info.nfaces {
                    return self.level_face(level, rface_id as usize, face_id);
                }
            }
        }

        let shared = self.handle.shared();
        let file = self.handle.id();
        let slot = Slot::Reduction {
            face: face_id,
            res: res.val(),
        };
        if let Some((handle, payload)) = shared.acquire(file, slot) {
            return Ok(FaceData::tracked(handle, payload.into_face()?, inner.pixel_size));
        }

        if res.ulog2 < -1 || res.vlog2 < -1 {
            warn!(face_id, ulog2 = res.ulog2, vlog2 = res.vlog2, "Sub-texel reduction requested");
            return Err(Error::SubTexelReduction {
                face_id,
                ulog2: res.ulog2,
                vlog2: res.vlog2,
            });
        }
        if redu < 0 || redv < 0 {
            warn!(face_id, ulog2 = res.ulog2, vlog2 = res.vlog2, "Enlargement requested");
            return Err(Error::EnlargementNotSupported {
                face_id,
                ulog2: res.ulog2,
                vlog2: res.vlog2,
            });
        }

        if inner.mesh_type == MeshType::Triangle {
            if redu != redv {
                warn!(face_id, "Anisotropic triangle reduction requested");
                return Err(Error::AnisotropicTriangleReduction { face_id });
            }
            if !res.is_whole() {
                warn!(face_id, "Triangle half-level blend requested");
                return Err(Error::SubTexelReduction {
                    face_id,
                    ulog2: res.ulog2,
                    vlog2: res.vlog2,
                });
            }
            let src = self.get_data(face_id, Res::new(res.ulog2 + 1, res.vlog2 + 1))?;
            return self.reduce_into(slot, src, ReduceKind::Triangle);
        }

        if !res.is_whole() {
            let blendu = if redu == redv {
                res.ulog2 & 1 != 0
            } else {
                redu > redv
            };
            if blendu {
                if res.ulog2 < 0 {
                    return self.blend(face_id, res, true, slot);
                }
                let src = self.get_data(face_id, Res::new(res.ulog2 + 1, res.vlog2))?;
                return self.reduce_into(slot, src, ReduceKind::U);
            }
            if res.vlog2 < 0 {
                return self.blend(face_id, res, false, slot);
            }
            let src = self.get_data(face_id, Res::new(res.ulog2, res.vlog2 + 1))?;
            return self.reduce_into(slot, src, ReduceKind::V);
        }

        let (src_res, kind) = if redu == redv {
            (Res::new(res.ulog2 + 1, res.vlog2 + 1), ReduceKind::Both)
        } else if redu > redv {
            (Res::new(res.ulog2 + 1, res.vlog2), ReduceKind::U)
        } else {
            (Res::new(res.ulog2, res.vlog2 + 1), ReduceKind::V)
        };
        let src = self.get_data(face_id, src_res)?;
        self.reduce_into(slot, src, kind)
    }

    /// Reduce `src` one step and publish it as reduction `slot`
    fn reduce_into(&self, slot: Slot, src: FaceData, kind: ReduceKind) -> Result<FaceData> {
        let inner = &self.inner;
        let plan = ReductionPlan::prepare(src, kind, inner.clone())?;
        let (handle, payload) =
            self.handle
                .shared()
                .build_gated(self.handle.id(), slot, &inner.reduce_lock, |_| plan.build())?;
        Ok(FaceData::tracked(handle, payload.into_face()?, inner.pixel_size))
    }

    /// Blend a face with its neighbors across one pair of edges
    ///
    /// `blendu` blends across the bottom and top edges into a half level
    /// along u; otherwise across the right and left edges along v. Each
    /// neighbor whose resolution covers the parent level contributes with
    /// equal weight; neighbors rotated by an odd quarter turn are added in
    /// reverse order.
    fn blend(&self, face_id: u32, res: Res, blendu: bool, slot: Slot) -> Result<FaceData> {
        let inner = &self.inner;
        let (length, e1, e2, pres) = if blendu {
            let length = if res.vlog2 <= 0 { 1 } else { res.v() };
            (length, EDGE_BOTTOM, EDGE_TOP, Res::new(res.ulog2 + 1, res.vlog2))
        } else {
            let length = if res.ulog2 <= 0 { 1 } else { res.u() };
            (length, EDGE_RIGHT, EDGE_LEFT, Res::new(res.ulog2, res.vlog2 + 1))
        };

        let info = *inner.face(face_id)?;
        let mut sources = vec![(self.get_data(face_id, pres)?, false)];
        for edge in [e1, e2] {
            let neighbor = info.adj_face(edge);
            if neighbor < 0 {
                continue;
            }
            let rotation = (info.adj_edge(edge) + 4 - edge + 2) & 3;
            let npres = if rotation & 1 != 0 { pres.swapped() } else { pres };
            let Ok(ninfo) = inner.face(neighbor as u32) else {
                continue;
            };
            if !ninfo.res.covers(&npres) {
                continue;
            }
            let flip = length > 1 && rotation & 1 != 0;
            sources.push((self.get_data(neighbor as u32, npres)?, flip));
        }

        // Expanding may load tiles, so it happens before the reduce lock.
        let expanded = sources
            .iter()
            .map(|(face, flip)| face.expand(length).map(|data| (data, *flip)))
            .collect::<Result<Vec<_>>>()?;
        drop(sources);

        let (handle, payload) =
            self.handle
                .shared()
                .build_gated(self.handle.id(), slot, &inner.reduce_lock, |_| {
                    let block = blend_sources(&expanded, length, res, inner);
                    let size = block.memory_size();
                    Ok(Built::new(Payload::Face(Arc::new(block)), size))
                })?;
        Ok(FaceData::tracked(handle, payload.into_face()?, inner.pixel_size))
    }

    /// Normalized float channels of the texel at (`u`, `v`) of the full face
    ///
    /// Fills `out` starting at channel `first_chan`; `out.len()` channels
    /// are converted, clipped to the texture's channel count.
    pub fn pixel(&self, face_id: u32, u: usize, v: usize, first_chan: usize, out: &mut [f32]) -> Result<()> {
        let res = self.inner.face(face_id)?.res;
        self.pixel_at(face_id, u, v, first_chan, out, res)
    }

    /// Like [`Reader::pixel`] at resolution `res`
    pub fn pixel_at(
        &self,
        face_id: u32,
        u: usize,
        v: usize,
        first_chan: usize,
        out: &mut [f32],
        res: Res,
    ) -> Result<()> {
        let nchan = self.inner.num_channels();
        if first_chan >= nchan {
            return Ok(());
        }
        let count = out.len().min(nchan - first_chan);
        let data = self.get_data(face_id, res)?;
        let texel = data.pixel(u, v)?;
        let ds = self.inner.data_type.size();
        let start = first_chan * ds;
        pixel::convert_to_float(&texel[start..start + count * ds], &mut out[..count], self.inner.data_type);
        Ok(())
    }

    /// Copy face `face_id` at `res` into a caller-owned buffer
    ///
    /// `stride` is the byte length of one destination row; zero means
    /// tightly packed. Tiled faces are copied tile by tile.
    pub fn read_face(&self, face_id: u32, buffer: &mut [u8], stride: usize, res: Res) -> Result<()> {
        let data = self.get_data(face_id, res)?;
        let ps = self.inner.pixel_size;
        let rowlen = res.u() * ps;
        let stride = if stride == 0 { rowlen } else { stride };
        let needed = stride.saturating_mul(res.v() - 1).saturating_add(rowlen);
        if buffer.len() < needed || stride < rowlen {
            return Err(Error::Config(format!(
                "buffer of {} bytes with stride {} cannot hold a {} face",
                buffer.len(),
                stride,
                res
            )));
        }

        if data.is_constant() {
            let texel = data.pixel(0, 0)?;
            pixel::fill(&texel, buffer, stride, res.u(), res.v());
            return Ok(());
        }
        if !data.is_tiled() {
            let src = data.data().unwrap_or_default();
            pixel::copy(src, rowlen, buffer, stride, res.v(), rowlen);
            return Ok(());
        }

        let tile_res = data.tile_res();
        let ntiles_u = res.ntiles_u(tile_res);
        let tile_rowlen = tile_res.u() * ps;
        for index in 0..data.num_tiles() {
            let tile = data.tile(index)?;
            let off = (index / ntiles_u) * tile_res.v() * stride + (index % ntiles_u) * tile_rowlen;
            if tile.is_constant() {
                let texel = tile.pixel(0, 0)?;
                pixel::fill(&texel, &mut buffer[off..], stride, tile_res.u(), tile_res.v());
            } else if let Some(src) = tile.data() {
                pixel::copy(src, tile_rowlen, &mut buffer[off..], stride, tile_res.v(), tile_rowlen);
            }
        }
        Ok(())
    }
}
