//! Synthetic texture writer shared by the integration tests
//!
//! Produces complete files in the on-disk layout: header, extended header,
//! zipped face table, zipped constant table, level table, level data,
//! metadata, barrier, large metadata and trailing edit records.

#![allow(dead_code)]

use std::cmp::Reverse;
use std::sync::Arc;

use ptex_cache::compression::{Compressor, ZlibCompressor};
use ptex_cache::format::{
    Encoding, ExtHeader, FaceDataHeader, Header, LevelInfo, EXT_HEADER_SIZE, HEADER_SIZE,
    LEVEL_INFO_SIZE, MAGIC, VERSION,
};
use ptex_cache::metadata::MetaDataType;
use ptex_cache::{pixel, Cache, CacheConfig, DataType, FaceInfo, MemoryInputHandler, MeshType, Res};

// =============================================================================
// Texture Builder
// =============================================================================

#[derive(Debug, Clone)]
pub struct Face {
    pub info: FaceInfo,
    /// Interleaved pixels; a single pixel for constant faces
    pub data: Vec<u8>,
    pub tile_res: Option<Res>,
}

#[derive(Debug, Clone)]
pub struct MetaRecord {
    pub key: String,
    pub data_type: MetaDataType,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct TextureBuilder {
    mesh_type: MeshType,
    data_type: DataType,
    nchannels: u16,
    alpha_chan: i32,
    mipmaps: bool,
    diff: bool,
    faces: Vec<Face>,
    meta: Vec<MetaRecord>,
    large_meta: Vec<MetaRecord>,
    face_edits: Vec<(u32, Face)>,
    meta_edits: Vec<Vec<MetaRecord>>,
}

impl TextureBuilder {
    pub fn new(mesh_type: MeshType, data_type: DataType, nchannels: u16) -> Self {
        Self {
            mesh_type,
            data_type,
            nchannels,
            alpha_chan: -1,
            mipmaps: false,
            diff: false,
            faces: Vec::new(),
            meta: Vec::new(),
            large_meta: Vec::new(),
            face_edits: Vec::new(),
            meta_edits: Vec::new(),
        }
    }

    pub fn pixel_size(&self) -> usize {
        self.data_type.size() * self.nchannels as usize
    }

    pub fn alpha(mut self, chan: i32) -> Self {
        self.alpha_chan = chan;
        self
    }

    /// Store reduced levels
    pub fn mipmaps(mut self, on: bool) -> Self {
        self.mipmaps = on;
        self
    }

    /// Delta-code integer blocks
    pub fn diff_encoding(mut self, on: bool) -> Self {
        self.diff = on;
        self
    }

    pub fn add_face(&mut self, res: Res, data: Vec<u8>) -> u32 {
        assert_eq!(data.len(), res.size() * self.pixel_size());
        self.push(Face {
            info: FaceInfo::new(res),
            data,
            tile_res: None,
        })
    }

    pub fn add_tiled_face(&mut self, res: Res, tile_res: Res, data: Vec<u8>) -> u32 {
        assert_eq!(data.len(), res.size() * self.pixel_size());
        self.push(Face {
            info: FaceInfo::new(res),
            data,
            tile_res: Some(tile_res),
        })
    }

    pub fn add_constant_face(&mut self, res: Res, pixel: Vec<u8>) -> u32 {
        assert_eq!(pixel.len(), self.pixel_size());
        let mut info = FaceInfo::new(res);
        info.flags |= FaceInfo::FLAG_CONSTANT;
        self.push(Face {
            info,
            data: pixel,
            tile_res: None,
        })
    }

    fn push(&mut self, face: Face) -> u32 {
        self.faces.push(face);
        (self.faces.len() - 1) as u32
    }

    /// Make edge `e1` of `f1` and edge `e2` of `f2` neighbors
    pub fn connect(&mut self, f1: u32, e1: usize, f2: u32, e2: usize) {
        self.faces[f1 as usize].info.set_adjacent(e1, f2 as i32, e2);
        self.faces[f2 as usize].info.set_adjacent(e2, f1 as i32, e1);
    }

    pub fn add_meta(&mut self, key: &str, data_type: MetaDataType, data: Vec<u8>) {
        self.meta.push(MetaRecord {
            key: key.to_string(),
            data_type,
            data,
        });
    }

    pub fn add_large_meta(&mut self, key: &str, data_type: MetaDataType, data: Vec<u8>) {
        self.large_meta.push(MetaRecord {
            key: key.to_string(),
            data_type,
            data,
        });
    }

    /// Append a face edit replacing `face_id` at `res`
    pub fn edit_face(&mut self, face_id: u32, res: Res, data: Vec<u8>) {
        assert_eq!(data.len(), res.size() * self.pixel_size());
        let mut info = FaceInfo::new(res);
        info.adj_edges = self.faces[face_id as usize].info.adj_edges;
        info.adj_faces = self.faces[face_id as usize].info.adj_faces;
        self.face_edits.push((
            face_id,
            Face {
                info,
                data,
                tile_res: None,
            },
        ));
    }

    /// Append one metadata edit record
    pub fn edit_meta(&mut self, records: Vec<MetaRecord>) {
        self.meta_edits.push(records);
    }

    /// Serialize the texture
    pub fn build(&self) -> Vec<u8> {
        let ps = self.pixel_size();
        let nchan = self.nchannels as usize;
        let dt = self.data_type;

        // Face table and constant table
        let mut face_table = Vec::new();
        let mut const_table = Vec::new();
        for face in &self.faces {
            face.info.write(&mut face_table);
            const_table.extend(self.average(face));
        }
        let face_table = zip(&face_table);
        let const_table = zip(&const_table);

        // Levels
        let key = |f: &Face| {
            if f.info.is_constant() {
                1
            } else {
                f.info.res.ulog2.min(f.info.res.vlog2)
            }
        };
        let nlevels = if self.mipmaps {
            self.faces.iter().map(|f| key(f) as usize + 1).max().unwrap_or(1)
        } else {
            1
        };
        let mut order: Vec<usize> = (0..self.faces.len()).collect();
        order.sort_by_key(|&f| Reverse(key(&self.faces[f])));

        let mut level_infos = Vec::new();
        let mut level_data = Vec::new();
        for level in 0..nlevels {
            let mut headers = Vec::new();
            let mut blocks = Vec::new();
            let faces: Vec<usize> = if level == 0 {
                (0..self.faces.len()).collect()
            } else {
                order
                    .iter()
                    .copied()
                    .filter(|&f| key(&self.faces[f]) as usize >= level)
                    .collect()
            };
            for &f in &faces {
                let face = &self.faces[f];
                let (fdh, block) = if face.info.is_constant() {
                    constant_block(&face.data)
                } else if level == 0 {
                    match face.tile_res {
                        Some(tile_res) => self.tiled_block(&face.data, face.info.res, tile_res),
                        None => self.block(&face.data, face.info.res),
                    }
                } else {
                    let mut data = face.data.clone();
                    let mut res = face.info.res;
                    for _ in 0..level {
                        let next = Res::new(res.ulog2 - 1, res.vlog2 - 1);
                        let mut out = vec![0u8; next.size() * ps];
                        pixel::reduce(&data, res.u() * ps, res.u(), res.v(), &mut out, next.u() * ps, dt, nchan);
                        data = out;
                        res = next;
                    }
                    self.block(&data, res)
                };
                headers.extend_from_slice(&fdh.0.to_le_bytes());
                blocks.extend(block);
            }
            let zipped_headers = zip(&headers);
            level_infos.push(LevelInfo {
                level_data_size: (zipped_headers.len() + blocks.len()) as u64,
                level_header_size: zipped_headers.len() as u32,
                nfaces: faces.len() as u32,
            });
            level_data.extend(zipped_headers);
            level_data.extend(blocks);
        }
        let mut level_table = Vec::new();
        for info in &level_infos {
            info.write(&mut level_table);
        }

        // Metadata
        let meta_mem = small_records(&self.meta);
        let meta_zip = if meta_mem.is_empty() { Vec::new() } else { zip(&meta_mem) };
        let mut lmd_headers = Vec::new();
        let mut lmd_data = Vec::new();
        for rec in &self.large_meta {
            let zipped = zip(&rec.data);
            key_prefix(&mut lmd_headers, rec);
            lmd_headers.extend_from_slice(&(zipped.len() as u32).to_le_bytes());
            lmd_data.extend(zipped);
        }
        let lmd_headers_zip = if lmd_headers.is_empty() {
            Vec::new()
        } else {
            zip(&lmd_headers)
        };

        // Edits
        let mut edits = Vec::new();
        for (face_id, face) in &self.face_edits {
            let (fdh, block) = self.block(&face.data, face.info.res);
            let mut body = Vec::new();
            body.extend_from_slice(&face_id.to_le_bytes());
            face.info.write(&mut body);
            body.extend_from_slice(&fdh.0.to_le_bytes());
            body.extend(self.average(face));
            body.extend(block);
            edits.push(0u8);
            edits.extend_from_slice(&(body.len() as u32).to_le_bytes());
            edits.extend(body);
        }
        for records in &self.meta_edits {
            let mem = small_records(records);
            let zipped = zip(&mem);
            let mut body = Vec::new();
            body.extend_from_slice(&(zipped.len() as u32).to_le_bytes());
            body.extend_from_slice(&(mem.len() as u32).to_le_bytes());
            body.extend(zipped);
            edits.push(1u8);
            edits.extend_from_slice(&(body.len() as u32).to_le_bytes());
            edits.extend(body);
        }

        let header = Header {
            magic: MAGIC,
            version: VERSION,
            mesh_type: self.mesh_type.to_u32(),
            data_type: dt.to_u32(),
            alpha_chan: self.alpha_chan,
            nchannels: self.nchannels,
            nlevels: nlevels as u16,
            nfaces: self.faces.len() as u32,
            ext_header_size: EXT_HEADER_SIZE as u32,
            face_info_size: face_table.len() as u32,
            const_data_size: const_table.len() as u32,
            level_info_size: (nlevels * LEVEL_INFO_SIZE) as u32,
            minor_version: 0,
            level_data_size: level_data.len() as u64,
            metadata_zip_size: meta_zip.len() as u32,
            metadata_mem_size: meta_mem.len() as u32,
        };

        let edit_pos = (HEADER_SIZE
            + EXT_HEADER_SIZE
            + face_table.len()
            + const_table.len()
            + level_table.len()
            + level_data.len()
            + meta_zip.len()
            + 8
            + lmd_headers_zip.len()
            + lmd_data.len()) as u64;
        let ext = ExtHeader {
            u_border_mode: 0,
            v_border_mode: 0,
            lmd_header_zip_size: lmd_headers_zip.len() as u32,
            lmd_header_mem_size: lmd_headers.len() as u32,
            lmd_data_size: lmd_data.len() as u64,
            edit_data_size: edits.len() as u64,
            edit_data_pos: if edits.is_empty() { 0 } else { edit_pos },
        };

        let mut out = header.to_bytes();
        out.extend(ext.to_bytes());
        out.extend(face_table);
        out.extend(const_table);
        out.extend(level_table);
        out.extend(level_data);
        out.extend(meta_zip);
        out.extend_from_slice(&[0u8; 8]);
        out.extend(lmd_headers_zip);
        out.extend(lmd_data);
        assert_eq!(out.len() as u64, edit_pos);
        out.extend(edits);
        out
    }

    /// Mean pixel stored in the constant table
    fn average(&self, face: &Face) -> Vec<u8> {
        if face.info.is_constant() {
            return face.data.clone();
        }
        let ps = self.pixel_size();
        let nchan = self.nchannels as usize;
        let mut data = face.data.clone();
        let mut res = face.info.res;
        while res.ulog2 > 0 || res.vlog2 > 0 {
            let next = Res::new((res.ulog2 - 1).max(0), (res.vlog2 - 1).max(0));
            let mut out = vec![0u8; next.size() * ps];
            let (sstride, dstride) = (res.u() * ps, next.u() * ps);
            if res.ulog2 > 0 && res.vlog2 > 0 {
                pixel::reduce(&data, sstride, res.u(), res.v(), &mut out, dstride, self.data_type, nchan);
            } else if res.ulog2 > 0 {
                pixel::reduce_u(&data, sstride, res.u(), res.v(), &mut out, dstride, self.data_type, nchan);
            } else {
                pixel::reduce_v(&data, sstride, res.u(), res.v(), &mut out, dstride, self.data_type, nchan);
            }
            data = out;
            res = next;
        }
        data
    }

    /// Zipped (or diff-zipped) planar block
    fn block(&self, data: &[u8], res: Res) -> (FaceDataHeader, Vec<u8>) {
        let mut planar = vec![0u8; data.len()];
        pixel::deinterleave(data, res.u(), res.v(), &mut planar, self.data_type, self.nchannels as usize);
        let encoding = if self.diff && !self.data_type.is_float() {
            pixel::encode_difference(&mut planar, self.data_type);
            Encoding::DiffZipped
        } else {
            Encoding::Zipped
        };
        let zipped = zip(&planar);
        (FaceDataHeader::new(zipped.len() as u32, encoding), zipped)
    }

    fn tiled_block(&self, data: &[u8], res: Res, tile_res: Res) -> (FaceDataHeader, Vec<u8>) {
        let ps = self.pixel_size();
        let ntu = res.ntiles_u(tile_res);
        let ntv = res.ntiles_v(tile_res);
        let (tu, tv) = (tile_res.u(), tile_res.v());
        let stride = res.u() * ps;

        let mut headers = Vec::new();
        let mut blocks = Vec::new();
        for i in 0..ntu * ntv {
            let (row, col) = (i / ntu, i % ntu);
            let mut tile = Vec::with_capacity(tu * tv * ps);
            for y in 0..tv {
                let off = (row * tv + y) * stride + col * tu * ps;
                tile.extend_from_slice(&data[off..off + tu * ps]);
            }
            let (fdh, block) = if is_uniform(&tile, ps) {
                constant_block(&tile[..ps])
            } else {
                self.block(&tile, tile_res)
            };
            headers.extend_from_slice(&fdh.0.to_le_bytes());
            blocks.extend(block);
        }

        let zipped_headers = zip(&headers);
        let mut out = vec![tile_res.ulog2 as u8, tile_res.vlog2 as u8];
        out.extend_from_slice(&(zipped_headers.len() as u32).to_le_bytes());
        out.extend(zipped_headers);
        out.extend(blocks);
        (FaceDataHeader::new(out.len() as u32, Encoding::Tiled), out)
    }
}

fn constant_block(pixel: &[u8]) -> (FaceDataHeader, Vec<u8>) {
    (
        FaceDataHeader::new(pixel.len() as u32, Encoding::Constant),
        pixel.to_vec(),
    )
}

fn key_prefix(out: &mut Vec<u8>, rec: &MetaRecord) {
    out.push((rec.key.len() + 1) as u8);
    out.extend_from_slice(rec.key.as_bytes());
    out.push(0);
    out.push(rec.data_type.to_u8());
    out.extend_from_slice(&(rec.data.len() as u32).to_le_bytes());
}

fn small_records(records: &[MetaRecord]) -> Vec<u8> {
    let mut out = Vec::new();
    for rec in records {
        key_prefix(&mut out, rec);
        out.extend_from_slice(&rec.data);
    }
    out
}

pub fn zip(data: &[u8]) -> Vec<u8> {
    ZlibCompressor::new().compress(data).expect("zlib compress")
}

/// True when every pixel of a packed block equals the first
fn is_uniform(data: &[u8], pixel_size: usize) -> bool {
    data.chunks(pixel_size).all(|p| p == &data[..pixel_size])
}

// =============================================================================
// Helpers
// =============================================================================

/// Deterministic non-constant u8 pixels
pub fn pattern(res: Res, nchan: usize, seed: u8) -> Vec<u8> {
    (0..res.size() * nchan)
        .map(|i| ((i * 37 + seed as usize * 101 + (i / nchan) * 13) % 251) as u8)
        .collect()
}

/// NUL-terminated string payload
pub fn meta_str(s: &str) -> Vec<u8> {
    let mut out = s.as_bytes().to_vec();
    out.push(0);
    out
}

pub fn meta_record(key: &str, data_type: MetaDataType, data: Vec<u8>) -> MetaRecord {
    MetaRecord {
        key: key.to_string(),
        data_type,
        data,
    }
}

/// Cache over an in-memory store holding `files`
pub fn memory_cache(
    config: CacheConfig,
    files: &[(&str, Vec<u8>)],
) -> (Cache, Arc<MemoryInputHandler>) {
    let store = Arc::new(MemoryInputHandler::new());
    for (path, data) in files {
        store.insert(*path, data.clone());
    }
    let cache = Cache::with_input_handler(config, store.clone()).expect("valid config");
    (cache, store)
}

/// Face read at `res` into a packed buffer
pub fn read_packed(reader: &ptex_cache::Reader, face_id: u32, res: Res) -> Vec<u8> {
    let mut buf = vec![0u8; res.size() * reader.pixel_size()];
    reader.read_face(face_id, &mut buf, 0, res).expect("read face");
    buf
}
