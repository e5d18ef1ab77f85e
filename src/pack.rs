use std::fmt;
use std::path::Path;

use serde::ser::SerializeSeq;
use serde::{Deserialize, Serialize, Serializer};
use tch::{Device, Kind, TchError, Tensor};
use tracing::debug;

use crate::error::{ExportError, LoadFailure, Result};
use crate::torch_file;

/// Axis removed from a freshly loaded pack.
pub const SQUEEZED_AXIS: i64 = 1;

/// Decimal rendering of the exported leaves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// Widen every element to `f64` before writing it.
    #[default]
    Double,
    /// Write the shortest decimal that reads back as the same `f32`.
    Single,
}

/// A voice-embedding tensor, typically `[510, 1, 256]` on disk and
/// `[510, 256]` once squeezed.
pub struct VoicePack {
    tensor: Tensor,
}

impl VoicePack {
    /// Reads the whole container at `path` into memory.
    ///
    /// The container format is picked from the file extension; anything that
    /// is not a known array format is read as a PyTorch archive.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let tensor = read_container(path).map_err(|e| ExportError::load(path, e))?;
        let kind = tensor.f_kind().map_err(|e| ExportError::load(path, e))?;
        if !is_real(kind) {
            return Err(ExportError::load(path, LoadFailure::Kind(kind)));
        }
        debug!("loaded {} as {:?} {:?}", path.display(), tensor.size(), kind);
        Ok(Self::from_tensor(tensor.to_device(Device::Cpu)))
    }

    pub fn from_tensor(tensor: Tensor) -> Self {
        VoicePack { tensor }
    }

    pub fn shape(&self) -> Vec<i64> {
        self.tensor.size()
    }

    /// Drops the singleton axis at [`SQUEEZED_AXIS`].
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::Shape`] when the pack has fewer than two axes or
    /// when axis 1 is not of size 1.
    pub fn squeeze_axis(self) -> Result<Self> {
        let shape = self.shape();
        match shape.get(SQUEEZED_AXIS as usize) {
            Some(&1) => Ok(VoicePack {
                tensor: self.tensor.squeeze_dim(SQUEEZED_AXIS),
            }),
            _ => Err(ExportError::Shape {
                expected: 1,
                found: shape,
            }),
        }
    }

    /// Copies the elements out of the tensor in row-major order, keeping the
    /// shape so they serialize as nested arrays.
    pub fn to_nested(&self, precision: Precision) -> std::result::Result<NestedArray, TchError> {
        let dims = self
            .shape()
            .into_iter()
            .map(|d| usize::try_from(d).unwrap_or(0))
            .collect();
        let flat = self.tensor.f_flatten(0, -1)?;
        let leaves = match precision {
            Precision::Double => {
                Leaves::Double(Vec::<f64>::try_from(&flat.f_to_kind(Kind::Double)?)?)
            }
            Precision::Single => {
                Leaves::Single(Vec::<f32>::try_from(&flat.f_to_kind(Kind::Float)?)?)
            }
        };
        Ok(NestedArray { dims, leaves })
    }

    /// Row picked by the synthesizer for an utterance of `token_count`
    /// phoneme tokens, clamped to the rows the pack has.
    pub fn style_row(&self, token_count: usize) -> std::result::Result<Vec<f32>, TchError> {
        let rows = self.shape().first().copied().unwrap_or(0);
        if rows == 0 {
            return Err(TchError::Shape("voice pack has no rows".to_string()));
        }
        let wanted = i64::try_from(token_count).unwrap_or(i64::MAX).saturating_sub(2);
        let row = self.tensor.get(wanted.clamp(0, rows - 1));
        Vec::<f32>::try_from(&row.f_flatten(0, -1)?.f_to_kind(Kind::Float)?)
    }
}

impl fmt::Display for VoicePack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tensor)
    }
}

fn is_real(kind: Kind) -> bool {
    matches!(
        kind,
        Kind::Uint8
            | Kind::Int8
            | Kind::Int16
            | Kind::Int
            | Kind::Int64
            | Kind::Half
            | Kind::BFloat16
            | Kind::Float
            | Kind::Double
    )
}

fn read_container(path: &Path) -> std::result::Result<Tensor, LoadFailure> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("npy") => Ok(Tensor::read_npy(path)?),
        Some("npz") => single_tensor(Tensor::read_npz(path)?),
        Some("safetensors") => single_tensor(Tensor::read_safetensors(path)?),
        Some("ot") => single_tensor(Tensor::load_multi(path)?),
        _ => read_torch_archive(path),
    }
}

/// Python `torch.save` archives first; archives written by libtorch (C++ or
/// tch) carry a module rather than a bare tensor and go to `Tensor::load`.
fn read_torch_archive(path: &Path) -> std::result::Result<Tensor, LoadFailure> {
    match torch_file::read_tensors(path) {
        Ok(named) if !named.is_empty() => single_tensor(named),
        Ok(_) => {
            debug!("no pickled tensor in {}, trying libtorch", path.display());
            Ok(Tensor::load(path)?)
        }
        Err(e) => {
            debug!("{} is not a pickled tensor archive: {}", path.display(), e);
            Tensor::load(path).map_err(|_| e)
        }
    }
}

fn single_tensor(mut named: Vec<(String, Tensor)>) -> std::result::Result<Tensor, LoadFailure> {
    let count = named.len();
    match named.pop() {
        Some((name, tensor)) if count == 1 => {
            debug!("using tensor '{}'", name);
            Ok(tensor)
        }
        _ => Err(LoadFailure::TensorCount(count)),
    }
}

enum Leaves {
    Double(Vec<f64>),
    Single(Vec<f32>),
}

/// Pack elements laid out for JSON output, one array level per axis.
pub struct NestedArray {
    dims: Vec<usize>,
    leaves: Leaves,
}

impl NestedArray {
    #[cfg(test)]
    pub(crate) fn dims(&self) -> &[usize] {
        &self.dims
    }
}

impl Serialize for NestedArray {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match &self.leaves {
            Leaves::Double(data) => Level::new(&self.dims, data).serialize(serializer),
            Leaves::Single(data) => Level::new(&self.dims, data).serialize(serializer),
        }
    }
}

struct Level<'a, T> {
    dims: &'a [usize],
    data: &'a [T],
}

impl<'a, T> Level<'a, T> {
    fn new(dims: &'a [usize], data: &'a [T]) -> Self {
        Level { dims, data }
    }
}

impl<T: Serialize> Serialize for Level<'_, T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let Some((&len, inner)) = self.dims.split_first() else {
            return self.data.first().serialize(serializer);
        };
        let stride: usize = inner.iter().product();
        let mut seq = serializer.serialize_seq(Some(len))?;
        for i in 0..len {
            let start = i * stride;
            let chunk = self.data.get(start..start + stride).unwrap_or(&[]);
            seq.serialize_element(&Level::new(inner, chunk))?;
        }
        seq.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack(values: &[f32], shape: &[i64]) -> VoicePack {
        VoicePack::from_tensor(Tensor::from_slice(values).view(shape))
    }

    #[test]
    fn squeeze_drops_axis_one() {
        let squeezed = pack(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 1, 3])
            .squeeze_axis()
            .unwrap();
        assert_eq!(squeezed.shape(), vec![2, 3]);
    }

    #[test]
    fn squeeze_keeps_trailing_singletons() {
        let squeezed = pack(&[1.0, 2.0], &[2, 1, 1]).squeeze_axis().unwrap();
        assert_eq!(squeezed.shape(), vec![2, 1]);
    }

    #[test]
    fn squeeze_rejects_wide_axis() {
        let err = pack(&[0.0; 6], &[3, 2]).squeeze_axis().err().unwrap();
        match err {
            ExportError::Shape { expected, found } => {
                assert_eq!(expected, 1);
                assert_eq!(found, vec![3, 2]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn squeeze_rejects_rank_one() {
        let err = pack(&[1.0, 2.0], &[2]).squeeze_axis().err().unwrap();
        assert!(matches!(err, ExportError::Shape { .. }));
    }

    #[test]
    fn nested_json_follows_shape() {
        let squeezed = pack(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 1, 3])
            .squeeze_axis()
            .unwrap();
        let nested = squeezed.to_nested(Precision::Double).unwrap();
        assert_eq!(nested.dims(), &[2, 3]);
        assert_eq!(
            serde_json::to_string(&nested).unwrap(),
            "[[1.0,2.0,3.0],[4.0,5.0,6.0]]"
        );
    }

    #[test]
    fn nested_json_handles_higher_rank() {
        let values: Vec<f32> = (0..8).map(|v| v as f32).collect();
        let squeezed = pack(&values, &[2, 1, 2, 2]).squeeze_axis().unwrap();
        let nested = squeezed.to_nested(Precision::Double).unwrap();
        assert_eq!(
            serde_json::to_string(&nested).unwrap(),
            "[[[0.0,1.0],[2.0,3.0]],[[4.0,5.0],[6.0,7.0]]]"
        );
    }

    #[test]
    fn nested_json_with_empty_axis() {
        let empty = Tensor::zeros([2, 1, 0], (Kind::Float, Device::Cpu));
        let squeezed = VoicePack::from_tensor(empty).squeeze_axis().unwrap();
        let nested = squeezed.to_nested(Precision::Double).unwrap();
        assert_eq!(serde_json::to_string(&nested).unwrap(), "[[],[]]");
    }

    #[test]
    fn precision_controls_decimal_text() {
        let squeezed = pack(&[0.1], &[1, 1]).squeeze_axis().unwrap();
        let render = |precision| serde_json::to_string(&squeezed.to_nested(precision).unwrap());
        let single = render(Precision::Single).unwrap();
        let double = render(Precision::Double).unwrap();
        assert_eq!(single, "[0.1]");
        assert_eq!(double, format!("[{}]", f64::from(0.1f32)));
    }

    #[test]
    fn style_row_is_clamped_to_pack() {
        let values: Vec<f32> = (0..12).map(|v| v as f32).collect();
        let squeezed = pack(&values, &[4, 1, 3]).squeeze_axis().unwrap();
        assert_eq!(squeezed.style_row(0).unwrap(), vec![0.0, 1.0, 2.0]);
        assert_eq!(squeezed.style_row(3).unwrap(), vec![3.0, 4.0, 5.0]);
        assert_eq!(squeezed.style_row(100).unwrap(), vec![9.0, 10.0, 11.0]);
    }

    #[test]
    fn integer_packs_are_real() {
        assert!(is_real(Kind::Int64));
        assert!(is_real(Kind::Half));
        assert!(!is_real(Kind::Bool));
        assert!(!is_real(Kind::ComplexFloat));
    }

    #[test]
    fn single_tensor_requires_exactly_one() {
        let t = || Tensor::from_slice(&[1.0f32]);
        assert!(single_tensor(vec![("pack".to_string(), t())]).is_ok());
        assert!(matches!(
            single_tensor(vec![]),
            Err(LoadFailure::TensorCount(0))
        ));
        assert!(matches!(
            single_tensor(vec![("a".to_string(), t()), ("b".to_string(), t())]),
            Err(LoadFailure::TensorCount(2))
        ));
    }
}
