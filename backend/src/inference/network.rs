use std::path::Path;
use std::sync::{Arc, Mutex};
use tch::{CModule, Device, Kind, Tensor};

use super::error::{ModelLoadError, PipelineError};

/// A TorchScript module shared by its full forward pass and any named
/// intermediate views cut from it.
#[derive(Clone)]
pub struct Network {
    name: &'static str,
    module: Arc<Mutex<CModule>>,
    device: Device,
}

/// Sub-model exposing an intermediate layer through an exported method.
/// Holds the parent's weights rather than a copy.
#[derive(Clone)]
pub struct LayerView {
    parent: Network,
    layer: String,
}

impl Network {
    pub fn load(name: &'static str, path: &Path, device: Device) -> Result<Self, ModelLoadError> {
        let mut module =
            CModule::load_on_device(path, device).map_err(|e| ModelLoadError::Corrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        module.set_eval();
        log::info!("Loaded {} from {} on {:?}", name, path.display(), device);
        Ok(Self {
            name,
            module: Arc::new(Mutex::new(module)),
            device,
        })
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn view(&self, layer: &str) -> LayerView {
        LayerView {
            parent: self.clone(),
            layer: layer.to_string(),
        }
    }

    pub fn forward(&self, input: &Tensor) -> Result<Tensor, PipelineError> {
        let module = self
            .module
            .lock()
            .map_err(|_| PipelineError::Poisoned(self.name))?;
        let output = tch::no_grad(|| module.forward_ts(&[input]))?;
        Ok(output)
    }

    fn call_method(&self, method: &str, input: &Tensor) -> Result<Tensor, PipelineError> {
        let module = self
            .module
            .lock()
            .map_err(|_| PipelineError::Poisoned(self.name))?;
        let output = tch::no_grad(|| module.method_ts(method, &[input]))?;
        Ok(output)
    }

    /// Runs a zero tensor of `input_shape` through the network and returns the
    /// width of the flattened per-sample output.
    pub fn probe_width(&self, input_shape: &[i64]) -> Result<usize, PipelineError> {
        let probe = Tensor::f_zeros(input_shape, (Kind::Float, self.device))?;
        Ok(output_width(&self.forward(&probe)?))
    }
}

impl LayerView {
    pub fn layer(&self) -> &str {
        &self.layer
    }

    pub fn forward(&self, input: &Tensor) -> Result<Tensor, PipelineError> {
        self.parent.call_method(&self.layer, input)
    }

    pub fn probe_width(&self, input_shape: &[i64]) -> Result<usize, PipelineError> {
        let probe = Tensor::f_zeros(input_shape, (Kind::Float, self.parent.device))?;
        Ok(output_width(&self.forward(&probe)?))
    }
}

fn output_width(output: &Tensor) -> usize {
    output.size().iter().skip(1).product::<i64>().max(0) as usize
}

/// Wraps a batch of one sample for the given device.
pub fn to_tensor(values: &[f32], shape: &[i64], device: Device) -> Result<Tensor, PipelineError> {
    let tensor = Tensor::f_from_slice(values)?
        .f_view(shape)?
        .f_to_device(device)?;
    Ok(tensor)
}

/// Copies a network output back into host memory as a flat vector.
pub fn to_vec(output: &Tensor) -> Result<Vec<f32>, PipelineError> {
    let flat = output
        .f_to_device(Device::Cpu)?
        .f_to_kind(Kind::Float)?
        .f_reshape([-1])?;
    Ok(Vec::<f32>::try_from(flat)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_tensor_rejects_mismatched_shape() {
        let result = to_tensor(&[1.0, 2.0, 3.0], &[1, 2], Device::Cpu);
        assert!(matches!(result, Err(PipelineError::Model(_))));
    }

    #[test]
    fn test_host_round_trip_flattens() {
        let tensor = to_tensor(&[1.0, 2.0, 3.0, 4.0], &[1, 2, 2], Device::Cpu).unwrap();
        assert_eq!(output_width(&tensor), 4);
        assert_eq!(to_vec(&tensor).unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    }
}
