//! Neural Network inference.

pub mod tensor;

use std::{ops::RangeInclusive, sync::Arc};

use anyhow::{anyhow, bail, ensure};
use tract_onnx::prelude::{
    Framework, Graph, InferenceModelExt, SimplePlan, TValue, TVec, TypedFact, TypedOp,
};

use crate::image::{CanonicalImage, Color, Resolution, RotatedRect, Vec2};
use tensor::Tensor;

type Model = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Name and shape of a network input or output node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    name: String,
    shape: Vec<usize>,
}

impl NodeInfo {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }
}

/// A neural network that can be used for inference.
///
/// This is a cheaply [`Clone`]able handle to the underlying network structures.
#[derive(Clone)]
pub struct NeuralNetwork(Arc<NeuralNetworkImpl>);

struct NeuralNetworkImpl {
    plan: Model,
    inputs: Vec<NodeInfo>,
}

impl NeuralNetwork {
    /// Loads and optimizes a pre-trained model from an in-memory ONNX file.
    ///
    /// Returns an error if the network data is malformed or incomplete, if it uses unimplemented
    /// operations, or if any of its inputs has a symbolic shape.
    pub fn from_onnx(raw: &[u8]) -> anyhow::Result<Self> {
        let graph = tract_onnx::onnx()
            .model_for_read(&mut &*raw)?
            .into_optimized()?;
        let outputs = graph.output_outlets()?.to_vec();
        let plan = SimplePlan::new_for_outputs(graph, &outputs)?;

        let model = plan.model();
        let mut inputs = Vec::new();
        for (id, outlet) in model.input_outlets()?.iter().enumerate() {
            let fact = model.input_fact(id)?;
            let shape = fact
                .shape
                .as_concrete()
                .ok_or_else(|| anyhow!("network input {} has a symbolic shape", id))?;
            inputs.push(NodeInfo {
                name: model.node(outlet.node).name.clone(),
                shape: shape.to_vec(),
            });
        }

        Ok(Self(Arc::new(NeuralNetworkImpl { plan, inputs })))
    }

    /// Returns the network's input nodes, in the order [`NeuralNetwork::estimate`] expects them.
    pub fn inputs(&self) -> &[NodeInfo] {
        &self.0.inputs
    }

    /// Runs the network on a set of input tensors, returning the estimated [`Outputs`].
    #[doc(alias = "infer")]
    pub fn estimate(&self, inputs: &[Tensor]) -> anyhow::Result<Outputs> {
        ensure!(
            inputs.len() == self.0.inputs.len(),
            "network takes {} inputs, got {}",
            self.0.inputs.len(),
            inputs.len()
        );

        let values = inputs
            .iter()
            .map(|t| Ok(TValue::from_const(Arc::new(t.to_tract()?))))
            .collect::<anyhow::Result<TVec<_>>>()?;
        let outputs = self.0.plan.run(values)?;
        let inner = outputs
            .iter()
            .map(|value| Tensor::from_tract(value))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Outputs { inner })
    }
}

/// Describes in what order a CNN expects its input image data.
///
/// - `N` is the number of images, fixed at 1.
/// - `C` is the number of color channels, 3 for RGB inputs.
/// - `H` and `W` are the height and width of the input, respectively.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CnnInputShape {
    /// Shape is `[N, C, H, W]`.
    NCHW,
    /// Shape is `[N, H, W, C]`.
    NHWC,
}

/// A convolutional neural network (CNN) that operates on image data.
///
/// Like the underlying [`NeuralNetwork`], this is cheaply [`Clone`]able.
#[derive(Clone)]
pub struct Cnn {
    nn: NeuralNetwork,
    shape: CnnInputShape,
    input_res: Resolution,
    color_mapper: ColorMapper,
}

impl Cnn {
    /// Creates a CNN wrapper from a [`NeuralNetwork`].
    ///
    /// The network must have exactly one input with a shape that matches the given
    /// [`CnnInputShape`].
    pub fn new(
        nn: NeuralNetwork,
        shape: CnnInputShape,
        color_mapper: ColorMapper,
    ) -> anyhow::Result<Self> {
        let input_res = Self::get_input_res(&nn, shape)?;
        Ok(Self {
            nn,
            shape,
            input_res,
            color_mapper,
        })
    }

    fn get_input_res(nn: &NeuralNetwork, shape: CnnInputShape) -> anyhow::Result<Resolution> {
        let input = match nn.inputs() {
            [input] => input,
            inputs => bail!(
                "CNN network has to take exactly 1 input, this one takes {}",
                inputs.len(),
            ),
        };

        let (w, h) = match (shape, input.shape()) {
            (CnnInputShape::NCHW, [1, 3, h, w]) | (CnnInputShape::NHWC, [1, h, w, 3]) => (*w, *h),
            (_, tensor_shape) => {
                bail!(
                    "invalid model input shape for {:?} CNN: {:?}",
                    shape,
                    tensor_shape,
                );
            }
        };

        Ok(Resolution::new(w.try_into()?, h.try_into()?))
    }

    /// Returns the expected input image size.
    #[inline]
    pub fn input_resolution(&self) -> Resolution {
        self.input_res
    }

    /// Runs the network on the part of `image` covered by `region`.
    ///
    /// The region is sampled (nearest neighbor) to create the network's input tensor. If the
    /// region's aspect ratio does not match the network's input aspect ratio, the contents will be
    /// stretched. Parts of the region outside of the image are fed to the network as black.
    pub fn estimate_region(
        &self,
        image: &CanonicalImage,
        region: RotatedRect,
    ) -> anyhow::Result<Outputs> {
        let tensor = self.region_tensor(image, region);
        self.nn.estimate(&[tensor])
    }

    fn region_tensor(&self, image: &CanonicalImage, region: RotatedRect) -> Tensor {
        let (w, h) = (
            self.input_res.width() as usize,
            self.input_res.height() as usize,
        );
        let sx = region.rect().width() / w as f32;
        let sy = region.rect().height() / h as f32;

        // Sample every input pixel once, then lay the channels out in the order the network wants.
        let mut pixels = Vec::with_capacity(w * h);
        for y in 0..h {
            for x in 0..w {
                let local = Vec2::new((x as f32 + 0.5) * sx, (y as f32 + 0.5) * sy);
                pixels.push(self.color_mapper.map(image.sample(region.transform_out(local))));
            }
        }

        match self.shape {
            CnnInputShape::NCHW => {
                Tensor::from_shape_fn([1, 3, h, w], |[_, c, y, x]| pixels[y * w + x][c])
            }
            CnnInputShape::NHWC => {
                Tensor::from_shape_fn([1, h, w, 3], |[_, y, x, c]| pixels[y * w + x][c])
            }
        }
    }
}

#[derive(Clone)]
enum ColorMapperKind {
    Linear { target_range: RangeInclusive<f32> },
}

/// Maps 8-bit sRGB colors to network input values.
#[derive(Clone)]
pub struct ColorMapper {
    kind: ColorMapperKind,
}

impl ColorMapper {
    /// Creates a simple color mapper that uniformly maps sRGB values to `target_range`.
    ///
    /// Note that this operates on *non-linear* sRGB colors, but maps them linearly to the target
    /// range.
    pub fn linear(target_range: RangeInclusive<f32>) -> Self {
        assert!(target_range.end() > target_range.start());

        Self {
            kind: ColorMapperKind::Linear { target_range },
        }
    }

    fn map(&self, color: Color) -> [f32; 3] {
        match &self.kind {
            ColorMapperKind::Linear { target_range } => {
                let start = *target_range.start();
                let end = *target_range.end();

                let adjust_range = (end - start) / 255.0;
                let rgb = [color.r(), color.g(), color.b()];
                rgb.map(|col| col as f32 * adjust_range + start)
            }
        }
    }
}

/// The result of a neural network inference pass.
///
/// This is a list of tensors corresponding to the network's output nodes.
#[derive(Debug)]
pub struct Outputs {
    inner: Vec<Tensor>,
}

impl Outputs {
    /// Returns the number of tensors in this inference output.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns the output tensor at `index`, or an error if the network produced fewer outputs.
    pub fn get(&self, index: usize) -> anyhow::Result<&Tensor> {
        self.inner.get(index).ok_or_else(|| {
            anyhow!(
                "network produced {} outputs, output {} is missing",
                self.inner.len(),
                index
            )
        })
    }
}

impl FromIterator<Tensor> for Outputs {
    fn from_iter<T: IntoIterator<Item = Tensor>>(iter: T) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_mapper() {
        let mapper = ColorMapper::linear(-1.0..=1.0);
        assert_eq!(mapper.map(Color::BLACK), [-1.0, -1.0, -1.0]);
        assert_eq!(mapper.map(Color::WHITE), [1.0, 1.0, 1.0]);

        let mapper = ColorMapper::linear(0.0..=1.0);
        assert_eq!(mapper.map(Color::NULL), [0.0, 0.0, 0.0]);
        assert_eq!(mapper.map(Color::from_rgb8(255, 0, 255)), [1.0, 0.0, 1.0]);
    }

    #[test]
    fn rejects_bad_onnx() {
        assert!(NeuralNetwork::from_onnx(b"definitely not protobuf").is_err());
    }

    #[test]
    fn outputs_report_missing() {
        let outputs: Outputs = [Tensor::from(1.0f32)].into_iter().collect();
        assert_eq!(outputs.len(), 1);
        assert!(outputs.get(0).is_ok());
        assert!(outputs.get(1).is_err());
    }
}
