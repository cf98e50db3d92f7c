use burn::prelude::*;
use burn::tensor::TensorData;

use crate::error::EvalError;
use crate::pipeline::GraphInput;

/// Shape of one board encoding: `nb_vect` cells of `vect_dim` features each.
///
/// The default is a 5x5 Santorini board with three features per cell
/// (two piece planes and one data plane).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct BoardShape {
    pub nb_vect: usize,
    pub vect_dim: usize,
}

impl Default for BoardShape {
    fn default() -> Self {
        BoardShape { nb_vect: 25, vect_dim: 3 }
    }
}

impl BoardShape {
    /// Number of scalars in one encoding.
    pub fn len(&self) -> usize {
        self.nb_vect * self.vect_dim
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Side of the square board, if `nb_vect` is a perfect square.
    pub fn side(&self) -> Option<usize> {
        let side = (self.nb_vect as f64).sqrt().round() as usize;
        (side * side == self.nb_vect).then_some(side)
    }
}

/// How an encoding is laid out before the first stage runs.
///
/// All layouts first transpose `[batch, nb_vect, vect_dim]` to feature-major
/// `[batch, vect_dim, nb_vect]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputLayout {
    /// `[batch, 1, vect_dim * nb_vect]`
    Flat,
    /// `[batch, vect_dim, side, side]`
    Planes,
    /// Planes `[batch, vect_dim - 1, side, side]`, the last feature plane
    /// split off as an auxiliary vector `[batch, 1, nb_vect]`.
    SplitAux,
}

impl InputLayout {
    pub fn reshape<B: Backend>(self, encoding: Tensor<B, 3>, board: &BoardShape) -> Result<GraphInput<B>, EvalError> {
        let [batch, _, _] = encoding.dims();
        let (n, dim) = (batch as i32, board.vect_dim as i32);
        let x = encoding.swap_dims(1, 2);

        if self == InputLayout::Flat {
            return Ok(GraphInput::Flat(x.reshape([n, 1, -1])));
        }
        let side = board.side().ok_or(EvalError::LayoutMismatch("non-square board"))? as i32;
        match self {
            InputLayout::Planes => Ok(GraphInput::Planar {
                planes: x.reshape([n, dim, side, side]),
                aux: None,
            }),
            _ => {
                let planes = x.clone().narrow(1, 0, board.vect_dim - 1);
                let aux = x.narrow(1, board.vect_dim - 1, 1);
                Ok(GraphInput::Planar {
                    planes: planes.reshape([n, dim - 1, side, side]),
                    aux: Some(aux),
                })
            }
        }
    }
}

/// Build a `[batch, nb_vect, vect_dim]` encoding tensor from row-major host data.
pub fn encoding_tensor<B: Backend>(
    data: &[f32],
    batch: usize,
    board: &BoardShape,
    device: &B::Device,
) -> Result<Tensor<B, 3>, EvalError> {
    if data.len() != batch * board.len() {
        return Err(EvalError::EncodingShape {
            expected: vec![batch, board.nb_vect, board.vect_dim],
            found: vec![data.len()],
        });
    }
    Ok(Tensor::<B, 1>::from_data(TensorData::from(data), device).reshape([
        batch as i32,
        board.nb_vect as i32,
        board.vect_dim as i32,
    ]))
}

/// Build a `[batch, action_size]` validity mask from row-major host data.
pub fn mask_tensor<B: Backend>(
    valid: &[bool],
    batch: usize,
    action_size: usize,
    device: &B::Device,
) -> Result<Tensor<B, 2, Bool>, EvalError> {
    if valid.len() != batch * action_size {
        return Err(EvalError::MaskShape {
            expected: vec![batch, action_size],
            found: vec![valid.len()],
        });
    }
    Ok(Tensor::from_data(
        TensorData::new(valid.to_vec(), [batch, action_size]),
        device,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    /// Cell `i`, feature `f` holds `100 * f + i`.
    fn encoding(board: &BoardShape) -> Tensor<TestBackend, 3> {
        let data: Vec<f32> = (0..board.nb_vect)
            .flat_map(|i| (0..board.vect_dim).map(move |f| (100 * f + i) as f32))
            .collect();
        encoding_tensor(&data, 1, board, &Default::default()).unwrap()
    }

    #[test]
    fn test_board_side() {
        assert_eq!(BoardShape::default().side(), Some(5));
        assert_eq!(BoardShape { nb_vect: 24, vect_dim: 3 }.side(), None);
    }

    #[test]
    fn test_flat_layout_is_feature_major() {
        let board = BoardShape::default();
        let GraphInput::Flat(x) = InputLayout::Flat.reshape(encoding(&board), &board).unwrap() else {
            panic!("expected flat input");
        };
        assert_eq!(x.dims(), [1, 1, 75]);
        let v: Vec<f32> = x.into_data().to_vec().unwrap();
        assert_eq!(v[0], 0.0);
        assert_eq!(v[24], 24.0);
        assert_eq!(v[25], 100.0);
        assert_eq!(v[74], 224.0);
    }

    #[test]
    fn test_split_layout_separates_data_plane() {
        let board = BoardShape::default();
        let GraphInput::Planar { planes, aux } = InputLayout::SplitAux.reshape(encoding(&board), &board).unwrap() else {
            panic!("expected planar input");
        };
        assert_eq!(planes.dims(), [1, 2, 5, 5]);
        let aux = aux.unwrap();
        assert_eq!(aux.dims(), [1, 1, 25]);
        let aux: Vec<f32> = aux.into_data().to_vec().unwrap();
        assert_eq!(aux[0], 200.0);
        assert_eq!(aux[24], 224.0);
        let planes: Vec<f32> = planes.into_data().to_vec().unwrap();
        // Plane 1, row 1, column 2 is cell 7.
        assert_eq!(planes[25 + 7], 107.0);
    }

    #[test]
    fn test_planes_layout_keeps_every_feature() {
        let board = BoardShape::default();
        let GraphInput::Planar { planes, aux } = InputLayout::Planes.reshape(encoding(&board), &board).unwrap() else {
            panic!("expected planar input");
        };
        assert_eq!(planes.dims(), [1, 3, 5, 5]);
        assert!(aux.is_none());
    }

    #[test]
    fn test_encoding_tensor_rejects_wrong_length() {
        let board = BoardShape::default();
        let err = encoding_tensor::<TestBackend>(&[0.0; 74], 1, &board, &Default::default()).unwrap_err();
        assert!(matches!(err, EvalError::EncodingShape { .. }));
    }

    #[test]
    fn test_mask_tensor_shape() {
        let mask = mask_tensor::<TestBackend>(&[true, false, true, false], 2, 2, &Default::default()).unwrap();
        assert_eq!(mask.dims(), [2, 2]);
        assert!(mask_tensor::<TestBackend>(&[true; 3], 2, 2, &Default::default()).is_err());
    }
}
