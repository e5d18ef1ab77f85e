//! Reader for archives written by Python's `torch.save`.
//!
//! The archive is a zip holding `<prefix>/data.pkl`, a pickle describing the
//! saved object, and one `<prefix>/data/<key>` entry per tensor storage.
//! Storages are referenced from the pickle through persistent ids of the form
//! `('storage', torch.FloatStorage, key, location, numel)`.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use tch::{Kind, Tensor};
use tracing::debug;
use zip::result::ZipError;
use zip::ZipArchive;

use crate::error::LoadFailure;

type Parsed<T> = std::result::Result<T, LoadFailure>;

fn format_err(msg: impl Into<String>) -> LoadFailure {
    LoadFailure::Format(msg.into())
}

/// Reads every tensor reachable from the root of the archive.
///
/// A bare tensor is returned under the name `tensor`; a dict (e.g. a state
/// dict) yields one entry per tensor value. Anything else yields nothing.
pub(crate) fn read_tensors(path: &Path) -> Parsed<Vec<(String, Tensor)>> {
    let mut zip = ZipArchive::new(BufReader::new(File::open(path)?))?;
    let pickle_name = zip
        .file_names()
        .find(|name| name.ends_with("data.pkl"))
        .map(str::to_string)
        .ok_or_else(|| format_err("no data.pkl record in archive"))?;
    let prefix = pickle_name.trim_end_matches("data.pkl").to_string();

    if let Some(order) = entry(&mut zip, &format!("{prefix}byteorder"))? {
        if order.trim_ascii() != b"little" {
            return Err(format_err("only little-endian storages are supported"));
        }
    }

    let pickle = entry(&mut zip, &pickle_name)?
        .ok_or_else(|| format_err("no data.pkl record in archive"))?;
    let root = Unpickler::new(&pickle).run()?;

    let candidates: Vec<(String, Object)> = match root {
        Object::Dict(entries) => entries
            .into_iter()
            .filter_map(|(key, value)| match key {
                Object::Str(name) => Some((name, value)),
                _ => None,
            })
            .collect(),
        obj => vec![("tensor".to_string(), obj)],
    };

    let mut tensors = Vec::new();
    for (name, obj) in candidates {
        if let Some(spec) = TensorSpec::from_object(&obj)? {
            debug!("{} -> storage {} {:?} {:?}", name, spec.storage, spec.kind, spec.size);
            tensors.push((name, spec.materialize(&mut zip, &prefix)?));
        }
    }
    Ok(tensors)
}

fn entry<R: Read + Seek>(zip: &mut ZipArchive<R>, name: &str) -> Parsed<Option<Vec<u8>>> {
    let mut file = match zip.by_name(name) {
        Ok(file) => file,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(Some(buf))
}

/// Values produced by the pickle machine.
#[allow(dead_code)]
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Object {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Tuple(Vec<Object>),
    List(Vec<Object>),
    Dict(Vec<(Object, Object)>),
    Global { module: String, name: String },
    Reduce { callable: Box<Object>, args: Box<Object> },
    Persistent(Box<Object>),
}

impl Object {
    fn is_global(&self, module: &str, name: &str) -> bool {
        matches!(self, Object::Global { module: m, name: n } if m == module && n == name)
    }
}

/// Subset of the pickle protocol (up to 4) emitted by `torch.save`.
pub(crate) struct Unpickler<'a> {
    data: &'a [u8],
    pos: usize,
    stack: Vec<Object>,
    marks: Vec<usize>,
    memo: HashMap<u32, Object>,
}

impl<'a> Unpickler<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Unpickler {
            data,
            pos: 0,
            stack: Vec::new(),
            marks: Vec::new(),
            memo: HashMap::new(),
        }
    }

    pub(crate) fn run(mut self) -> Parsed<Object> {
        loop {
            let op = self.u8()?;
            match op {
                // PROTO
                0x80 => {
                    self.u8()?;
                }
                // FRAME
                0x95 => {
                    self.take(8)?;
                }
                // STOP
                b'.' => return self.pop(),
                b'(' => self.marks.push(self.stack.len()),
                b')' => self.stack.push(Object::Tuple(Vec::new())),
                b't' => {
                    let items = self.pop_mark()?;
                    self.stack.push(Object::Tuple(items));
                }
                0x85 => {
                    let a = self.pop()?;
                    self.stack.push(Object::Tuple(vec![a]));
                }
                0x86 => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack.push(Object::Tuple(vec![a, b]));
                }
                0x87 => {
                    let c = self.pop()?;
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack.push(Object::Tuple(vec![a, b, c]));
                }
                b']' => self.stack.push(Object::List(Vec::new())),
                b'a' => {
                    let item = self.pop()?;
                    match self.top()? {
                        Object::List(items) => items.push(item),
                        _ => return Err(format_err("APPEND on a non-list")),
                    }
                }
                b'e' => {
                    let new_items = self.pop_mark()?;
                    match self.top()? {
                        Object::List(items) => items.extend(new_items),
                        _ => return Err(format_err("APPENDS on a non-list")),
                    }
                }
                b'}' => self.stack.push(Object::Dict(Vec::new())),
                b's' => {
                    let value = self.pop()?;
                    let key = self.pop()?;
                    match self.top()? {
                        Object::Dict(entries) => entries.push((key, value)),
                        _ => return Err(format_err("SETITEM on a non-dict")),
                    }
                }
                b'u' => {
                    let flat = self.pop_mark()?;
                    if flat.len() % 2 != 0 {
                        return Err(format_err("SETITEMS with an odd item count"));
                    }
                    let mut pairs = Vec::with_capacity(flat.len() / 2);
                    let mut items = flat.into_iter();
                    while let (Some(key), Some(value)) = (items.next(), items.next()) {
                        pairs.push((key, value));
                    }
                    match self.top()? {
                        Object::Dict(entries) => entries.extend(pairs),
                        _ => return Err(format_err("SETITEMS on a non-dict")),
                    }
                }
                // BINPUT, LONG_BINPUT, MEMOIZE
                b'q' => {
                    let key = u32::from(self.u8()?);
                    self.memo_put(key)?;
                }
                b'r' => {
                    let key = self.u32()?;
                    self.memo_put(key)?;
                }
                0x94 => {
                    let key = u32::try_from(self.memo.len()).unwrap_or(u32::MAX);
                    self.memo_put(key)?;
                }
                // BINGET, LONG_BINGET
                b'h' => {
                    let key = u32::from(self.u8()?);
                    self.memo_get(key)?;
                }
                b'j' => {
                    let key = self.u32()?;
                    self.memo_get(key)?;
                }
                b'c' => {
                    let module = self.line()?;
                    let name = self.line()?;
                    self.stack.push(Object::Global { module, name });
                }
                // STACK_GLOBAL
                0x93 => {
                    let name = self.pop_str()?;
                    let module = self.pop_str()?;
                    self.stack.push(Object::Global { module, name });
                }
                // REDUCE, NEWOBJ
                b'R' | 0x81 => {
                    let args = self.pop()?;
                    let callable = self.pop()?;
                    self.stack.push(reduce(callable, args));
                }
                // BUILD keeps the target; tensor state is carried by the
                // rebuild arguments.
                b'b' => {
                    self.pop()?;
                }
                b'J' => {
                    let b = self.take(4)?;
                    let value = i32::from_le_bytes([b[0], b[1], b[2], b[3]]);
                    self.stack.push(Object::Int(i64::from(value)));
                }
                b'K' => {
                    let value = self.u8()?;
                    self.stack.push(Object::Int(i64::from(value)));
                }
                b'M' => {
                    let b = self.take(2)?;
                    let value = u16::from_le_bytes([b[0], b[1]]);
                    self.stack.push(Object::Int(i64::from(value)));
                }
                // LONG1
                0x8a => {
                    let len = usize::from(self.u8()?);
                    let bytes = self.take(len)?;
                    self.stack.push(Object::Int(decode_long(bytes)?));
                }
                b'G' => {
                    let b = self.take(8)?;
                    let mut buf = [0u8; 8];
                    buf.copy_from_slice(b);
                    self.stack.push(Object::Float(f64::from_be_bytes(buf)));
                }
                // BINUNICODE, SHORT_BINUNICODE, BINUNICODE8
                b'X' => {
                    let len = self.u32()? as usize;
                    self.push_str(len)?;
                }
                0x8c => {
                    let len = usize::from(self.u8()?);
                    self.push_str(len)?;
                }
                0x8d => {
                    let b = self.take(8)?;
                    let mut buf = [0u8; 8];
                    buf.copy_from_slice(b);
                    let len = usize::try_from(u64::from_le_bytes(buf))
                        .map_err(|_| format_err("string length overflows"))?;
                    self.push_str(len)?;
                }
                // BINBYTES, SHORT_BINBYTES
                b'B' => {
                    let len = self.u32()? as usize;
                    let bytes = self.take(len)?.to_vec();
                    self.stack.push(Object::Bytes(bytes));
                }
                b'C' => {
                    let len = usize::from(self.u8()?);
                    let bytes = self.take(len)?.to_vec();
                    self.stack.push(Object::Bytes(bytes));
                }
                // BINPERSID
                b'Q' => {
                    let pid = self.pop()?;
                    self.stack.push(Object::Persistent(Box::new(pid)));
                }
                0x88 => self.stack.push(Object::Bool(true)),
                0x89 => self.stack.push(Object::Bool(false)),
                b'N' => self.stack.push(Object::None),
                // POP, POP_MARK, DUP
                b'0' => {
                    self.pop()?;
                }
                b'1' => {
                    self.pop_mark()?;
                }
                b'2' => {
                    let top = self.top()?.clone();
                    self.stack.push(top);
                }
                op => return Err(format_err(format!("unsupported pickle opcode 0x{op:02x}"))),
            }
        }
    }

    fn take(&mut self, n: usize) -> Parsed<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| format_err("truncated pickle"))?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> Parsed<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Parsed<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn line(&mut self) -> Parsed<String> {
        let rest = &self.data[self.pos..];
        let len = rest
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| format_err("unterminated GLOBAL line"))?;
        let line = String::from_utf8(rest[..len].to_vec())
            .map_err(|_| format_err("GLOBAL line is not UTF-8"))?;
        self.pos += len + 1;
        Ok(line)
    }

    fn push_str(&mut self, len: usize) -> Parsed<()> {
        let bytes = self.take(len)?;
        let s = String::from_utf8(bytes.to_vec()).map_err(|_| format_err("string is not UTF-8"))?;
        self.stack.push(Object::Str(s));
        Ok(())
    }

    fn pop(&mut self) -> Parsed<Object> {
        self.stack
            .pop()
            .ok_or_else(|| format_err("pickle stack underflow"))
    }

    fn pop_str(&mut self) -> Parsed<String> {
        match self.pop()? {
            Object::Str(s) => Ok(s),
            other => Err(format_err(format!("expected a string, found {other:?}"))),
        }
    }

    fn pop_mark(&mut self) -> Parsed<Vec<Object>> {
        let mark = self
            .marks
            .pop()
            .filter(|&mark| mark <= self.stack.len())
            .ok_or_else(|| format_err("pickle mark underflow"))?;
        Ok(self.stack.split_off(mark))
    }

    fn top(&mut self) -> Parsed<&mut Object> {
        self.stack
            .last_mut()
            .ok_or_else(|| format_err("pickle stack underflow"))
    }

    fn memo_put(&mut self, key: u32) -> Parsed<()> {
        let top = self.top()?.clone();
        self.memo.insert(key, top);
        Ok(())
    }

    fn memo_get(&mut self, key: u32) -> Parsed<()> {
        let obj = self
            .memo
            .get(&key)
            .cloned()
            .ok_or_else(|| format_err(format!("missing memo entry {key}")))?;
        self.stack.push(obj);
        Ok(())
    }
}

fn reduce(callable: Object, args: Object) -> Object {
    if callable.is_global("collections", "OrderedDict") {
        return Object::Dict(Vec::new());
    }
    Object::Reduce {
        callable: Box::new(callable),
        args: Box::new(args),
    }
}

fn decode_long(bytes: &[u8]) -> Parsed<i64> {
    if bytes.len() > 8 {
        return Err(format_err("integer wider than 64 bits"));
    }
    let negative = bytes.last().is_some_and(|b| b & 0x80 != 0);
    let mut buf = if negative { [0xff; 8] } else { [0; 8] };
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(i64::from_le_bytes(buf))
}

fn storage_kind(storage_type: &Object) -> Parsed<Kind> {
    let Object::Global { module, name } = storage_type else {
        return Err(format_err(format!("unexpected storage type {storage_type:?}")));
    };
    if module != "torch" {
        return Err(format_err(format!("unexpected storage module {module}")));
    }
    let kind = match name.as_str() {
        "FloatStorage" => Kind::Float,
        "DoubleStorage" => Kind::Double,
        "HalfStorage" => Kind::Half,
        "BFloat16Storage" => Kind::BFloat16,
        "LongStorage" => Kind::Int64,
        "IntStorage" => Kind::Int,
        "ShortStorage" => Kind::Int16,
        "CharStorage" => Kind::Int8,
        "ByteStorage" => Kind::Uint8,
        "BoolStorage" => Kind::Bool,
        other => return Err(format_err(format!("unsupported storage {other}"))),
    };
    Ok(kind)
}

fn ints(obj: &Object) -> Parsed<Vec<i64>> {
    match obj {
        Object::Tuple(items) | Object::List(items) => items
            .iter()
            .map(|item| match item {
                Object::Int(v) => Ok(*v),
                other => Err(format_err(format!("expected an integer, found {other:?}"))),
            })
            .collect(),
        other => Err(format_err(format!("expected an integer tuple, found {other:?}"))),
    }
}

/// Where a tensor's elements live and how they are laid out.
#[derive(Debug, PartialEq)]
struct TensorSpec {
    storage: String,
    kind: Kind,
    offset: i64,
    size: Vec<i64>,
    stride: Vec<i64>,
}

impl TensorSpec {
    fn from_object(obj: &Object) -> Parsed<Option<Self>> {
        let Object::Reduce { callable, args } = obj else {
            return Ok(None);
        };
        let Object::Global { module, name } = callable.as_ref() else {
            return Ok(None);
        };
        let args = match args.as_ref() {
            Object::Tuple(args) => args.as_slice(),
            _ => return Ok(None),
        };
        match (module.as_str(), name.as_str()) {
            ("torch._utils", "_rebuild_tensor" | "_rebuild_tensor_v2") => match args {
                [Object::Persistent(pid), Object::Int(offset), size, stride, ..] => {
                    let (storage, kind) = storage_ref(pid)?;
                    Ok(Some(TensorSpec {
                        storage,
                        kind,
                        offset: *offset,
                        size: ints(size)?,
                        stride: ints(stride)?,
                    }))
                }
                _ => Err(format_err("malformed tensor rebuild arguments")),
            },
            ("torch._utils", "_rebuild_parameter") => match args.first() {
                Some(data) => Self::from_object(data),
                None => Ok(None),
            },
            ("torch._tensor", "_rebuild_from_type_v2") => match args {
                [func, _type, inner, ..] => Self::from_object(&Object::Reduce {
                    callable: Box::new(func.clone()),
                    args: Box::new(inner.clone()),
                }),
                _ => Ok(None),
            },
            _ => Ok(None),
        }
    }

    fn materialize<R: Read + Seek>(&self, zip: &mut ZipArchive<R>, prefix: &str) -> Parsed<Tensor> {
        let name = format!("{prefix}data/{}", self.storage);
        let bytes = entry(zip, &name)?
            .ok_or_else(|| format_err(format!("missing storage record {name}")))?;
        let elt_size = self.kind.elt_size_in_bytes();
        if bytes.len() % elt_size != 0 {
            return Err(format_err(format!(
                "storage {name} holds {} bytes, not a multiple of {elt_size}",
                bytes.len()
            )));
        }
        let numel = i64::try_from(bytes.len() / elt_size)
            .map_err(|_| format_err("storage too large"))?;
        self.check_bounds(numel)?;

        let storage = Tensor::f_from_data_size(&bytes, &[numel], self.kind)?;
        let tensor = storage
            .f_as_strided(self.size.as_slice(), self.stride.as_slice(), self.offset)?
            .f_contiguous()?;
        Ok(tensor)
    }

    fn check_bounds(&self, numel: i64) -> Parsed<()> {
        if self.size.len() != self.stride.len() {
            return Err(format_err("size and stride ranks differ"));
        }
        if self.offset < 0 || self.size.iter().chain(&self.stride).any(|&v| v < 0) {
            return Err(format_err("negative size, stride or offset"));
        }
        if self.size.contains(&0) {
            return Ok(());
        }
        let last = self
            .size
            .iter()
            .zip(&self.stride)
            .try_fold(self.offset, |acc, (&size, &stride)| {
                (size - 1).checked_mul(stride).and_then(|span| acc.checked_add(span))
            })
            .ok_or_else(|| format_err("tensor extent overflows"))?;
        if last >= numel {
            return Err(format_err(format!(
                "tensor reaches element {last} of a storage holding {numel}"
            )));
        }
        Ok(())
    }
}

fn storage_ref(pid: &Object) -> Parsed<(String, Kind)> {
    match pid {
        Object::Tuple(items) => match items.as_slice() {
            [Object::Str(tag), storage_type, Object::Str(key), ..] if tag == "storage" => {
                Ok((key.clone(), storage_kind(storage_type)?))
            }
            _ => Err(format_err(format!("unexpected persistent id {pid:?}"))),
        },
        _ => Err(format_err(format!("unexpected persistent id {pid:?}"))),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Write;

    use super::*;

    /// Pickle bytes laid out the way `torch.save` writes a plain tensor.
    pub(crate) fn tensor_pickle(
        storage: &str,
        numel: u8,
        offset: u8,
        size: &[u8],
        stride: &[u8],
    ) -> Vec<u8> {
        fn int_tuple(out: &mut Vec<u8>, values: &[u8]) {
            out.push(b'(');
            for v in values {
                out.extend([b'K', *v]);
            }
            out.push(b't');
        }
        let mut out = vec![0x80, 0x02];
        out.extend(b"ctorch._utils\n_rebuild_tensor_v2\nq\x00((");
        out.extend(b"X\x07\x00\x00\x00storageq\x01ctorch\n");
        out.extend(storage.as_bytes());
        out.extend(b"\nq\x02X\x01\x00\x00\x000q\x03X\x03\x00\x00\x00cpuq\x04K");
        out.extend([numel, b't', b'q', 0x05, b'Q', b'K', offset]);
        int_tuple(&mut out, size);
        int_tuple(&mut out, stride);
        out.extend(b"\x89ccollections\nOrderedDict\nq\x06)Rq\x07tq\x08Rq\x09.");
        out
    }

    /// A `torch.save`-style archive with one storage under `data/0`.
    pub(crate) fn write_archive(path: &Path, pickle: &[u8], storage: &[u8]) {
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        let options =
            zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Stored);
        zip.start_file("af/data.pkl", options).unwrap();
        zip.write_all(pickle).unwrap();
        zip.start_file("af/byteorder", options).unwrap();
        zip.write_all(b"little").unwrap();
        zip.start_file("af/data/0", options).unwrap();
        zip.write_all(storage).unwrap();
        zip.start_file("af/version", options).unwrap();
        zip.write_all(b"3\n").unwrap();
        zip.finish().unwrap();
    }

    fn f32_bytes(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn unpickles_nested_containers() {
        // {'a': [1, -2], 'b': (None, True, 1.5)}
        let mut data = vec![0x80, 0x02, b'}', b'q', 0x00, b'('];
        data.extend(b"X\x01\x00\x00\x00a]q\x01(K\x01\x8a\x01\xfeeX\x01\x00\x00\x00b");
        data.extend([b'N', 0x88, b'G']);
        data.extend(1.5f64.to_be_bytes());
        data.extend([0x87, b'u', b'.']);

        let obj = Unpickler::new(&data).run().unwrap();

        assert_eq!(
            obj,
            Object::Dict(vec![
                (
                    Object::Str("a".into()),
                    Object::List(vec![Object::Int(1), Object::Int(-2)])
                ),
                (
                    Object::Str("b".into()),
                    Object::Tuple(vec![Object::None, Object::Bool(true), Object::Float(1.5)])
                ),
            ])
        );
    }

    #[test]
    fn memo_returns_earlier_objects() {
        let data = b"\x80\x02X\x02\x00\x00\x00hiq\x00h\x00\x86.";
        let obj = Unpickler::new(data).run().unwrap();
        assert_eq!(
            obj,
            Object::Tuple(vec![Object::Str("hi".into()), Object::Str("hi".into())])
        );
    }

    #[test]
    fn truncated_pickle_is_rejected() {
        let err = Unpickler::new(b"\x80\x02X\x05\x00\x00\x00ab").run().unwrap_err();
        assert!(matches!(err, LoadFailure::Format(_)));
    }

    #[test]
    fn decodes_tensor_spec() {
        let pickle = tensor_pickle("FloatStorage", 6, 0, &[2, 1, 3], &[3, 3, 1]);
        let root = Unpickler::new(&pickle).run().unwrap();
        let spec = TensorSpec::from_object(&root).unwrap().unwrap();
        assert_eq!(
            spec,
            TensorSpec {
                storage: "0".into(),
                kind: Kind::Float,
                offset: 0,
                size: vec![2, 1, 3],
                stride: vec![3, 3, 1],
            }
        );
    }

    #[test]
    fn reads_saved_tensor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("af.pt");
        let values = [1.0_f32, 2.0, 3.0, 4.0, 5.0, 6.0];
        write_archive(
            &path,
            &tensor_pickle("FloatStorage", 6, 0, &[2, 1, 3], &[3, 3, 1]),
            &f32_bytes(&values),
        );

        let tensors = read_tensors(&path).unwrap();

        assert_eq!(tensors.len(), 1);
        let (name, tensor) = &tensors[0];
        assert_eq!(name, "tensor");
        assert_eq!(tensor.size(), vec![2, 1, 3]);
        assert_eq!(Vec::<f32>::try_from(&tensor.flatten(0, -1)).unwrap(), values);
    }

    #[test]
    fn honours_offset_and_stride() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("af.pt");
        // Storage [9, 1, 2, 3, 4, 5, 6] viewed from offset 1 as the transpose
        // of [[1, 2, 3], [4, 5, 6]].
        write_archive(
            &path,
            &tensor_pickle("FloatStorage", 7, 1, &[3, 1, 2], &[1, 1, 3]),
            &f32_bytes(&[9.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0]),
        );

        let tensors = read_tensors(&path).unwrap();

        let tensor = &tensors[0].1;
        assert_eq!(tensor.size(), vec![3, 1, 2]);
        assert_eq!(
            Vec::<f32>::try_from(&tensor.flatten(0, -1)).unwrap(),
            vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]
        );
    }

    #[test]
    fn out_of_bounds_view_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("af.pt");
        write_archive(
            &path,
            &tensor_pickle("FloatStorage", 6, 0, &[3, 1, 3], &[3, 3, 1]),
            &f32_bytes(&[0.0; 6]),
        );

        let err = read_tensors(&path).unwrap_err();

        assert!(matches!(err, LoadFailure::Format(_)));
    }

    #[test]
    fn reads_double_storage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("af.pt");
        let storage: Vec<u8> = [0.5_f64, -0.25].iter().flat_map(|v| v.to_le_bytes()).collect();
        write_archive(
            &path,
            &tensor_pickle("DoubleStorage", 2, 0, &[2, 1], &[1, 1]),
            &storage,
        );

        let tensors = read_tensors(&path).unwrap();

        assert_eq!(tensors[0].1.kind(), Kind::Double);
        assert_eq!(
            Vec::<f64>::try_from(&tensors[0].1.flatten(0, -1)).unwrap(),
            vec![0.5, -0.25]
        );
    }

    #[test]
    fn unknown_storage_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("af.pt");
        write_archive(
            &path,
            &tensor_pickle("ComplexFloatStorage", 1, 0, &[1, 1], &[1, 1]),
            &[0; 8],
        );

        assert!(matches!(read_tensors(&path), Err(LoadFailure::Format(_))));
    }

    #[test]
    fn non_archive_is_a_zip_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("af.pt");
        std::fs::write(&path, b"not a tensor").unwrap();

        assert!(matches!(read_tensors(&path), Err(LoadFailure::Archive(_))));
    }
}
