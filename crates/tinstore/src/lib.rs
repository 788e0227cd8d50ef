//! TINSTORE: dependency-light layered store for TIN terrain datasets.
//!
//! - One file per terrain, holding up to three typed layers:
//!   `Points`, `Breaklines` and `Boundary`.
//! - Layer order on disk is the order of `TinFile::layers`; records keep
//!   their insertion order.
//! - Optional CRS string, carried opaquely.
//! - Optional zlib compression of every layer payload.
//!
//! File layout (little-endian):
//!   00  : [u8;4]  magic = b"TINS"
//!   04  : u32     version = 1
//!   08  : u32     flags (bitfield)
//!                 bit 0 => CRS string present
//!                 bit 1 => layer payloads are zlib-compressed
//!   0C  : u32     layer_count
//!   ..  : str     crs                 (if bit0)
//!   ..  : layer_count layer chunks
//!
//! Layer chunk:
//!   [u8;4] tag ("PNTS" | "BRKL" | "BNDY")
//!   u32    record_count
//!   u32    payload_size
//!   [payload_size bytes] (zlib stream if bit1)
//!
//! PNTS record:
//!   u32 seq, f64 x, f64 y, f64 z, str code, opt_str comment, u8 contourable
//!
//! BRKL record:
//!   u32 vertex_count, [f64;2] * vertex_count, str code, opt_str name,
//!   f64 length, u8 softness
//!
//! BNDY record:
//!   u32 vertex_count, [f64;2] * vertex_count, f64 area, f64 perimeter
//!
//! `str` is `u32 byte_len` followed by UTF-8 bytes; `opt_str` is a `u8`
//! presence marker followed by a `str` when the marker is 1.

use std::fs::{self, File};
use std::io::{self, ErrorKind, Write};
use std::path::Path;

pub const TINS_MAGIC: [u8; 4] = *b"TINS";
pub const TINS_VERSION: u32 = 1;

const FLAG_CRS: u32 = 1 << 0;
const FLAG_DEFLATE: u32 = 1 << 1;

/// zlib level used for compressed payloads.
const DEFLATE_LEVEL: u8 = 6;

/// The three logical layers of a terrain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerKind {
    Points,
    Breaklines,
    Boundary,
}

impl LayerKind {
    pub const ALL: [LayerKind; 3] = [LayerKind::Points, LayerKind::Breaklines, LayerKind::Boundary];

    /// Human readable layer name.
    pub fn name(self) -> &'static str {
        match self {
            LayerKind::Points => "Points",
            LayerKind::Breaklines => "Breaklines",
            LayerKind::Boundary => "Boundary",
        }
    }

    /// Case-insensitive lookup by layer name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(name))
    }

    fn tag(self) -> &'static [u8; 4] {
        match self {
            LayerKind::Points => b"PNTS",
            LayerKind::Breaklines => b"BRKL",
            LayerKind::Boundary => b"BNDY",
        }
    }

    fn from_tag(tag: &[u8]) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }
}

impl std::fmt::Display for LayerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Breakline hardness. Only `Soft` is produced by the ingestion pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Softness {
    Soft = 0,
    Hard = 1,
}

impl Softness {
    pub fn as_str(self) -> &'static str {
        match self {
            Softness::Soft => "soft",
            Softness::Hard => "hard",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PointRecord {
    /// 1-based position in the ingestion batch.
    pub seq: u32,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub code: String,
    pub comment: Option<String>,
    pub contourable: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BreaklineRecord {
    pub vertices: Vec<[f64; 2]>,
    pub code: String,
    pub name: Option<String>,
    pub length: f64,
    pub vertex_count: u32,
    pub softness: Softness,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryRecord {
    /// Closed exterior ring (first coordinate repeated at the end).
    pub ring: Vec<[f64; 2]>,
    pub area: f64,
    pub perimeter: f64,
    pub vertex_count: u32,
}

/// Records of one layer.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerData {
    Points(Vec<PointRecord>),
    Breaklines(Vec<BreaklineRecord>),
    Boundary(Vec<BoundaryRecord>),
}

impl LayerData {
    /// An empty layer of the given kind.
    pub fn empty(kind: LayerKind) -> Self {
        match kind {
            LayerKind::Points => LayerData::Points(Vec::new()),
            LayerKind::Breaklines => LayerData::Breaklines(Vec::new()),
            LayerKind::Boundary => LayerData::Boundary(Vec::new()),
        }
    }

    pub fn kind(&self) -> LayerKind {
        match self {
            LayerData::Points(_) => LayerKind::Points,
            LayerData::Breaklines(_) => LayerKind::Breaklines,
            LayerData::Boundary(_) => LayerKind::Boundary,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            LayerData::Points(v) => v.len(),
            LayerData::Breaklines(v) => v.len(),
            LayerData::Boundary(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append `other` to this layer. Returns `false` (and leaves both
    /// untouched) when the kinds differ.
    pub fn extend(&mut self, other: LayerData) -> bool {
        match (self, other) {
            (LayerData::Points(a), LayerData::Points(b)) => a.extend(b),
            (LayerData::Breaklines(a), LayerData::Breaklines(b)) => a.extend(b),
            (LayerData::Boundary(a), LayerData::Boundary(b)) => a.extend(b),
            _ => return false,
        }
        true
    }
}

/// In-memory image of one store file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TinFile {
    pub crs: Option<String>,
    /// Compress layer payloads on write.
    pub deflate: bool,
    pub layers: Vec<LayerData>,
}

impl TinFile {
    pub fn layer(&self, kind: LayerKind) -> Option<&LayerData> {
        self.layers.iter().find(|layer| layer.kind() == kind)
    }

    pub fn layer_mut(&mut self, kind: LayerKind) -> Option<&mut LayerData> {
        self.layers.iter_mut().find(|layer| layer.kind() == kind)
    }

    /// Insert or replace the layer of the same kind, keeping its position.
    pub fn set_layer(&mut self, data: LayerData) {
        match self.layer_mut(data.kind()) {
            Some(slot) => *slot = data,
            None => self.layers.push(data),
        }
    }

    pub fn layer_kinds(&self) -> Vec<LayerKind> {
        self.layers.iter().map(LayerData::kind).collect()
    }
}

#[inline(always)]
fn need(buf: &[u8], want: usize) -> io::Result<()> {
    if buf.len() < want {
        Err(io::Error::new(ErrorKind::UnexpectedEof, "truncated TINS"))
    } else {
        Ok(())
    }
}

#[inline(always)]
fn take<'a>(buf: &mut &'a [u8], n: usize) -> io::Result<&'a [u8]> {
    need(buf, n)?;
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

#[inline(always)]
fn le_u8(buf: &mut &[u8]) -> io::Result<u8> {
    Ok(take(buf, 1)?[0])
}

#[inline(always)]
fn le_u32(buf: &mut &[u8]) -> io::Result<u32> {
    let b = take(buf, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

#[inline(always)]
fn le_f64(buf: &mut &[u8]) -> io::Result<f64> {
    let b = take(buf, 8)?;
    Ok(f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
}

fn le_str(buf: &mut &[u8]) -> io::Result<String> {
    let len = le_u32(buf)? as usize;
    let raw = take(buf, len)?;
    String::from_utf8(raw.to_vec()).map_err(|_| bad("string is not UTF-8"))
}

fn le_opt_str(buf: &mut &[u8]) -> io::Result<Option<String>> {
    match le_u8(buf)? {
        0 => Ok(None),
        1 => Ok(Some(le_str(buf)?)),
        x => Err(bad(&format!("bad optional string marker {}", x))),
    }
}

fn le_bool(buf: &mut &[u8]) -> io::Result<bool> {
    match le_u8(buf)? {
        0 => Ok(false),
        1 => Ok(true),
        x => Err(bad(&format!("bad boolean byte {}", x))),
    }
}

/// Decode `count` packed `[f64; 2]` vertices.
fn le_vertices(buf: &mut &[u8], count: usize) -> io::Result<Vec<[f64; 2]>> {
    let bytes = count
        .checked_mul(16)
        .ok_or_else(|| bad("vertex block size overflow"))?;
    let raw = take(buf, bytes)?;

    #[cfg(target_endian = "little")]
    {
        // The block sits at an arbitrary offset after variable-length
        // strings, so copy out instead of reinterpreting in place.
        Ok(bytemuck::pod_collect_to_vec::<u8, [f64; 2]>(raw))
    }

    #[cfg(not(target_endian = "little"))]
    {
        let mut out = Vec::with_capacity(count);
        let mut rest = raw;
        for _ in 0..count {
            let x = le_f64(&mut rest)?;
            let y = le_f64(&mut rest)?;
            out.push([x, y]);
        }
        Ok(out)
    }
}

#[cold]
fn bad(msg: &str) -> io::Error {
    io::Error::new(ErrorKind::InvalidData, msg)
}

/// Parse a store image from a contiguous byte slice. This is the single
/// source of truth for parsing.
pub fn parse_tin_bytes(mut p: &[u8]) -> io::Result<TinFile> {
    if take(&mut p, 4)? != TINS_MAGIC {
        return Err(bad("bad TINS magic"));
    }

    let version = le_u32(&mut p)?;
    if version != TINS_VERSION {
        return Err(bad("unsupported TINS version"));
    }

    let flags = le_u32(&mut p)?;
    let has_crs = (flags & FLAG_CRS) != 0;
    let deflate = (flags & FLAG_DEFLATE) != 0;

    let layer_count = le_u32(&mut p)? as usize;

    let crs = if has_crs { Some(le_str(&mut p)?) } else { None };

    let mut layers = Vec::with_capacity(layer_count.min(LayerKind::ALL.len()));

    for _ in 0..layer_count {
        let tag = take(&mut p, 4)?;
        let kind = LayerKind::from_tag(tag).ok_or_else(|| bad("unknown layer tag"))?;

        if layers.iter().any(|l: &LayerData| l.kind() == kind) {
            return Err(bad("duplicate layer chunk"));
        }

        let count = le_u32(&mut p)? as usize;
        let payload_size = le_u32(&mut p)? as usize;
        let stored = take(&mut p, payload_size)?;

        let inflated;
        let mut payload: &[u8] = if deflate {
            inflated = miniz_oxide::inflate::decompress_to_vec_zlib(stored)
                .map_err(|e| bad(&format!("corrupt layer payload: {:?}", e.status)))?;
            &inflated
        } else {
            stored
        };

        let data = parse_layer(kind, count, &mut payload)?;

        if !payload.is_empty() {
            return Err(bad("trailing bytes in layer payload"));
        }

        layers.push(data);
    }

    if !p.is_empty() {
        return Err(bad("trailing bytes after last layer"));
    }

    Ok(TinFile {
        crs,
        deflate,
        layers,
    })
}

fn parse_layer(kind: LayerKind, count: usize, p: &mut &[u8]) -> io::Result<LayerData> {
    // Every record is at least a few bytes; cap the pre-allocation so a
    // corrupt count cannot request gigabytes up front.
    let cap = count.min(p.len());

    match kind {
        LayerKind::Points => {
            let mut out = Vec::with_capacity(cap);
            for _ in 0..count {
                out.push(PointRecord {
                    seq: le_u32(p)?,
                    x: le_f64(p)?,
                    y: le_f64(p)?,
                    z: le_f64(p)?,
                    code: le_str(p)?,
                    comment: le_opt_str(p)?,
                    contourable: le_bool(p)?,
                });
            }
            Ok(LayerData::Points(out))
        }
        LayerKind::Breaklines => {
            let mut out = Vec::with_capacity(cap);
            for _ in 0..count {
                let n = le_u32(p)?;
                let vertices = le_vertices(p, n as usize)?;
                let code = le_str(p)?;
                let name = le_opt_str(p)?;
                let length = le_f64(p)?;
                let softness = match le_u8(p)? {
                    0 => Softness::Soft,
                    1 => Softness::Hard,
                    x => return Err(bad(&format!("unknown softness {}", x))),
                };
                out.push(BreaklineRecord {
                    vertices,
                    code,
                    name,
                    length,
                    vertex_count: n,
                    softness,
                });
            }
            Ok(LayerData::Breaklines(out))
        }
        LayerKind::Boundary => {
            let mut out = Vec::with_capacity(cap);
            for _ in 0..count {
                let n = le_u32(p)?;
                let ring = le_vertices(p, n as usize)?;
                out.push(BoundaryRecord {
                    ring,
                    area: le_f64(p)?,
                    perimeter: le_f64(p)?,
                    vertex_count: n,
                });
            }
            Ok(LayerData::Boundary(out))
        }
    }
}

/// Fast path: prefer mmap; fall back to a single read.
#[cfg(feature = "mmap")]
pub fn read_file<P: AsRef<Path>>(path: P) -> io::Result<TinFile> {
    let file = File::open(path)?;
    let map = unsafe { memmap2::MmapOptions::new().map(&file)? };
    parse_tin_bytes(&map)
}

#[cfg(not(feature = "mmap"))]
pub fn read_file<P: AsRef<Path>>(path: P) -> io::Result<TinFile> {
    let bytes = std::fs::read(path)?;
    parse_tin_bytes(&bytes)
}

/// Serialize a store image into a byte vector.
pub fn encode_tin(tin: &TinFile) -> io::Result<Vec<u8>> {
    let mut flags = 0u32;

    if tin.crs.is_some() {
        flags |= FLAG_CRS;
    }

    if tin.deflate {
        flags |= FLAG_DEFLATE;
    }

    let mut out = Vec::<u8>::new();

    out.write_all(&TINS_MAGIC)?;

    write_u32(&mut out, TINS_VERSION)?;
    write_u32(&mut out, flags)?;
    write_u32(&mut out, len_u32(tin.layers.len())?)?;

    if let Some(crs) = tin.crs.as_deref() {
        write_str(&mut out, crs)?;
    }

    for layer in &tin.layers {
        let raw = encode_layer(layer)?;
        let payload = if tin.deflate {
            miniz_oxide::deflate::compress_to_vec_zlib(&raw, DEFLATE_LEVEL)
        } else {
            raw
        };

        out.write_all(layer.kind().tag())?;
        write_u32(&mut out, len_u32(layer.len())?)?;
        write_u32(&mut out, len_u32(payload.len())?)?;
        out.write_all(&payload)?;
    }

    Ok(out)
}

fn encode_layer(layer: &LayerData) -> io::Result<Vec<u8>> {
    let mut w = Vec::<u8>::new();

    match layer {
        LayerData::Points(points) => {
            for point in points {
                write_u32(&mut w, point.seq)?;
                write_f64(&mut w, point.x)?;
                write_f64(&mut w, point.y)?;
                write_f64(&mut w, point.z)?;
                write_str(&mut w, &point.code)?;
                write_opt_str(&mut w, point.comment.as_deref())?;
                w.write_all(&[point.contourable as u8])?;
            }
        }
        LayerData::Breaklines(lines) => {
            for line in lines {
                if line.vertex_count as usize != line.vertices.len() {
                    return Err(io::Error::new(
                        ErrorKind::InvalidData,
                        "vertex_count != vertices length",
                    ));
                }
                write_u32(&mut w, line.vertex_count)?;
                write_vertices(&mut w, &line.vertices)?;
                write_str(&mut w, &line.code)?;
                write_opt_str(&mut w, line.name.as_deref())?;
                write_f64(&mut w, line.length)?;
                w.write_all(&[line.softness as u8])?;
            }
        }
        LayerData::Boundary(rings) => {
            for boundary in rings {
                if boundary.vertex_count as usize != boundary.ring.len() {
                    return Err(io::Error::new(
                        ErrorKind::InvalidData,
                        "vertex_count != ring length",
                    ));
                }
                write_u32(&mut w, boundary.vertex_count)?;
                write_vertices(&mut w, &boundary.ring)?;
                write_f64(&mut w, boundary.area)?;
                write_f64(&mut w, boundary.perimeter)?;
            }
        }
    }

    Ok(w)
}

/// Write the store image next to `path` and rename it into place, so a
/// failed write never leaves a half-written store behind.
pub fn write_file<P: AsRef<Path>>(path: P, tin: &TinFile) -> io::Result<()> {
    let path = path.as_ref();
    let bytes = encode_tin(tin)?;

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = Path::new(&tmp_name);

    {
        let mut file = File::create(tmp_path)?;
        file.write_all(&bytes)?;
        file.flush()?;
        file.sync_all()?;
    }

    fs::rename(tmp_path, path)?;

    Ok(())
}

#[inline]
fn len_u32(len: usize) -> io::Result<u32> {
    u32::try_from(len).map_err(|_| bad("length exceeds u32"))
}

#[inline]
fn write_u32<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

#[inline]
fn write_f64<W: Write>(w: &mut W, v: f64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_str<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    write_u32(w, len_u32(s.len())?)?;
    w.write_all(s.as_bytes())
}

fn write_opt_str<W: Write>(w: &mut W, s: Option<&str>) -> io::Result<()> {
    match s {
        Some(s) => {
            w.write_all(&[1])?;
            write_str(w, s)
        }
        None => w.write_all(&[0]),
    }
}

fn write_vertices<W: Write>(w: &mut W, vertices: &[[f64; 2]]) -> io::Result<()> {
    #[cfg(target_endian = "little")]
    {
        w.write_all(bytemuck::cast_slice(vertices))
    }

    #[cfg(not(target_endian = "little"))]
    {
        for v in vertices {
            write_f64(w, v[0])?;
            write_f64(w, v[1])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TinFile {
        TinFile {
            crs: Some("EPSG:2193".to_string()),
            deflate: false,
            layers: vec![
                LayerData::Points(vec![
                    PointRecord {
                        seq: 1,
                        x: 1.5,
                        y: -2.25,
                        z: 10.0,
                        code: "TOE".to_string(),
                        comment: None,
                        contourable: true,
                    },
                    PointRecord {
                        seq: 2,
                        x: 1.5,
                        y: -2.245,
                        z: 10.0,
                        code: "TOE".to_string(),
                        comment: Some("duplicate of 1".to_string()),
                        contourable: false,
                    },
                ]),
                LayerData::Breaklines(vec![BreaklineRecord {
                    vertices: vec![[0.0, 0.0], [3.0, 4.0]],
                    code: "TOE".to_string(),
                    name: Some("creek".to_string()),
                    length: 5.0,
                    vertex_count: 2,
                    softness: Softness::Soft,
                }]),
                LayerData::Boundary(Vec::new()),
            ],
        }
    }

    #[test]
    fn test_encode_parse_preserves_layers() {
        let tin = sample();
        let bytes = encode_tin(&tin).unwrap();
        assert_eq!(&bytes[..4], b"TINS");
        assert_eq!(parse_tin_bytes(&bytes).unwrap(), tin);
    }

    #[test]
    fn test_deflate_payloads() {
        let mut tin = sample();
        tin.deflate = true;

        let bytes = encode_tin(&tin).unwrap();
        let parsed = parse_tin_bytes(&bytes).unwrap();

        assert!(parsed.deflate);
        assert_eq!(parsed.layers, tin.layers);
    }

    #[test]
    fn test_rejects_truncated_and_foreign_bytes() {
        let bytes = encode_tin(&sample()).unwrap();

        let err = parse_tin_bytes(&bytes[..bytes.len() - 3]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);

        let mut foreign = bytes.clone();
        foreign[..4].copy_from_slice(b"HYPC");
        assert_eq!(
            parse_tin_bytes(&foreign).unwrap_err().kind(),
            ErrorKind::InvalidData
        );
    }

    #[test]
    fn test_vertex_count_must_match() {
        let mut tin = sample();
        if let Some(LayerData::Breaklines(lines)) = tin.layer_mut(LayerKind::Breaklines) {
            lines[0].vertex_count = 3;
        }
        assert!(encode_tin(&tin).is_err());
    }

    #[test]
    fn test_write_file_replaces_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site.tin");

        write_file(&path, &sample()).unwrap();

        let mut updated = sample();
        updated.set_layer(LayerData::Points(Vec::new()));
        write_file(&path, &updated).unwrap();

        let read = read_file(&path).unwrap();
        assert_eq!(read, updated);
        assert_eq!(
            read.layer_kinds(),
            vec![LayerKind::Points, LayerKind::Breaklines, LayerKind::Boundary]
        );
        assert!(!dir.path().join("site.tin.tmp").exists());
    }

    #[test]
    fn test_layer_kind_names() {
        assert_eq!(LayerKind::from_name("points"), Some(LayerKind::Points));
        assert_eq!(LayerKind::from_name("BOUNDARY"), Some(LayerKind::Boundary));
        assert_eq!(LayerKind::from_name("contours"), None);
    }

    #[test]
    fn test_extend_requires_same_kind() {
        let mut points = LayerData::empty(LayerKind::Points);
        assert!(!points.extend(LayerData::empty(LayerKind::Boundary)));
        assert!(points.is_empty());
    }
}
