//! Execution strategy definitions for inference replicas.
//!
//! An execution strategy selects the backend a replica's inference session
//! runs on. Every strategy expands to an ordered fallback chain; replica setup
//! walks the chain and keeps the first strategy that constructs successfully.
//!
//! - `Cpu`: always available, slowest
//! - `Cuda`: NVIDIA GPU via CUDA
//! - `TensorRt`: NVIDIA GPU via TensorRT (falls back to CUDA, then CPU)
//! - `DirectMl`: DirectX 12 GPU on Windows
//! - `Auto`: best available, in the order TensorRT, CUDA, DirectML, CPU

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Backend used to run inference for one replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ExecutionStrategy {
    /// CPU execution provider.
    #[default]
    #[serde(rename = "cpu")]
    Cpu,

    /// CUDA execution provider, one device per replica.
    #[serde(rename = "cuda")]
    Cuda,

    /// TensorRT execution provider, one device per replica.
    #[serde(rename = "tensor-rt")]
    TensorRt,

    /// DirectML execution provider, one adapter per replica.
    #[serde(rename = "directml")]
    DirectMl,

    /// Pick the best strategy that can be constructed.
    #[serde(rename = "auto")]
    Auto,
}

impl ExecutionStrategy {
    /// All selectable strategies.
    pub const ALL: &'static [ExecutionStrategy] = &[
        ExecutionStrategy::Cpu,
        ExecutionStrategy::Cuda,
        ExecutionStrategy::TensorRt,
        ExecutionStrategy::DirectMl,
        ExecutionStrategy::Auto,
    ];

    /// Returns the strategy name as accepted on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStrategy::Cpu => "cpu",
            ExecutionStrategy::Cuda => "cuda",
            ExecutionStrategy::TensorRt => "tensor-rt",
            ExecutionStrategy::DirectMl => "directml",
            ExecutionStrategy::Auto => "auto",
        }
    }

    /// Ordered list of concrete strategies to try for this selection.
    ///
    /// The list never contains `Auto` and always ends with `Cpu`.
    pub fn fallback_chain(&self) -> Vec<ExecutionStrategy> {
        match self {
            ExecutionStrategy::Cpu => vec![ExecutionStrategy::Cpu],
            ExecutionStrategy::Cuda => vec![ExecutionStrategy::Cuda, ExecutionStrategy::Cpu],
            ExecutionStrategy::TensorRt => vec![
                ExecutionStrategy::TensorRt,
                ExecutionStrategy::Cuda,
                ExecutionStrategy::Cpu,
            ],
            ExecutionStrategy::DirectMl => {
                vec![ExecutionStrategy::DirectMl, ExecutionStrategy::Cpu]
            }
            ExecutionStrategy::Auto => vec![
                ExecutionStrategy::TensorRt,
                ExecutionStrategy::Cuda,
                ExecutionStrategy::DirectMl,
                ExecutionStrategy::Cpu,
            ],
        }
    }

    /// Returns true if this strategy places work on a GPU.
    pub fn uses_gpu(&self) -> bool {
        matches!(
            self,
            ExecutionStrategy::Cuda | ExecutionStrategy::TensorRt | ExecutionStrategy::DirectMl
        )
    }
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ExecutionStrategy {
    type Err = ExecutionStrategyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cpu" => Ok(ExecutionStrategy::Cpu),
            "cuda" => Ok(ExecutionStrategy::Cuda),
            "tensor-rt" | "tensorrt" | "trt" => Ok(ExecutionStrategy::TensorRt),
            "directml" | "dml" => Ok(ExecutionStrategy::DirectMl),
            "auto" => Ok(ExecutionStrategy::Auto),
            _ => Err(ExecutionStrategyParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
#[error("Unknown execution strategy: {0} (expected cpu, cuda, tensor-rt, directml or auto)")]
pub struct ExecutionStrategyParseError(String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_parse() {
        assert_eq!("cpu".parse::<ExecutionStrategy>().unwrap(), ExecutionStrategy::Cpu);
        assert_eq!("CUDA".parse::<ExecutionStrategy>().unwrap(), ExecutionStrategy::Cuda);
        assert_eq!(
            "tensor-rt".parse::<ExecutionStrategy>().unwrap(),
            ExecutionStrategy::TensorRt
        );
        assert_eq!(
            "directml".parse::<ExecutionStrategy>().unwrap(),
            ExecutionStrategy::DirectMl
        );
        assert_eq!("auto".parse::<ExecutionStrategy>().unwrap(), ExecutionStrategy::Auto);
        assert!("opencl".parse::<ExecutionStrategy>().is_err());
    }

    #[test]
    fn test_strategy_display_matches_parse() {
        for strategy in ExecutionStrategy::ALL {
            assert_eq!(strategy.to_string().parse::<ExecutionStrategy>().unwrap(), *strategy);
        }
    }

    #[test]
    fn test_fallback_chain_ends_with_cpu() {
        for strategy in ExecutionStrategy::ALL {
            let chain = strategy.fallback_chain();
            assert_eq!(chain.last(), Some(&ExecutionStrategy::Cpu));
            assert!(!chain.contains(&ExecutionStrategy::Auto));
        }
    }

    #[test]
    fn test_auto_prefers_tensorrt() {
        let chain = ExecutionStrategy::Auto.fallback_chain();
        assert_eq!(chain[0], ExecutionStrategy::TensorRt);
        assert_eq!(chain.len(), 4);
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&ExecutionStrategy::TensorRt).unwrap();
        assert_eq!(json, "\"tensor-rt\"");
        let parsed: ExecutionStrategy = serde_json::from_str("\"directml\"").unwrap();
        assert_eq!(parsed, ExecutionStrategy::DirectMl);
    }
}
