//! Parameter descriptors for index construction.
//!
//! A descriptor is checked in full before any engine object is allocated:
//! raw enum values from the boundary are converted first, then the numeric
//! parameters are validated against the selected method.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{HandleError, Result};

/// FAISS prints a clustering warning below this many points per centroid.
pub const MIN_POINTS_PER_CENTROID: usize = 39;

/// Largest partition count, the range of a FAISS `int` list number.
pub const MAX_PARTITIONS: usize = i32::MAX as usize;

/// Largest supported code width. Codes are stored one byte per subvector.
pub const MAX_BITS_PER_CODE: usize = 8;

/// Index family a handle belongs to.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MethodType {
    /// Inverted file over product-quantized residuals.
    QuantizedIvf = 0,
    /// Inverted file over packed binary codes, Hamming distance.
    BinaryIvf = 1,
    /// Graph over product-quantized objects, built after appending.
    QuantizedGraph = 2,
}

impl MethodType {
    /// Convert a boundary value, `None` if it names no method.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(MethodType::QuantizedIvf),
            1 => Some(MethodType::BinaryIvf),
            2 => Some(MethodType::QuantizedGraph),
            _ => None,
        }
    }

    pub fn as_raw(self) -> i32 {
        self as i32
    }

    /// Whether the method has an explicit training step.
    pub fn supports_train(self) -> bool {
        matches!(self, MethodType::QuantizedIvf | MethodType::BinaryIvf)
    }

    /// Whether the method has an explicit build step.
    pub fn supports_build(self) -> bool {
        matches!(self, MethodType::QuantizedGraph)
    }
}

impl fmt::Display for MethodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodType::QuantizedIvf => write!(f, "QuantizedIVF"),
            MethodType::BinaryIvf => write!(f, "BinaryIVF"),
            MethodType::QuantizedGraph => write!(f, "QuantizedGraph"),
        }
    }
}

/// Distance metric. Numbering follows the FAISS C API.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricType {
    InnerProduct = 0,
    L2 = 1,
}

impl MetricType {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(MetricType::InnerProduct),
            1 => Some(MetricType::L2),
            _ => None,
        }
    }

    pub fn as_raw(self) -> i32 {
        self as i32
    }
}

impl Default for MetricType {
    fn default() -> Self {
        Self::L2
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricType::InnerProduct => write!(f, "InnerProduct"),
            MetricType::L2 => write!(f, "L2"),
        }
    }
}

/// K-means settings used when training quantizers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainParams {
    /// Lloyd iterations per clustering run.
    pub iterations: usize,
    /// Seed for centroid initialisation.
    pub seed: u64,
}

impl Default for TrainParams {
    fn default() -> Self {
        Self {
            iterations: 25,
            seed: 1234,
        }
    }
}

/// Build and search settings for the quantized graph.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GraphParams {
    /// Edges kept per node after build.
    pub out_degree: usize,
    /// Beam width used when linking nodes inserted after build.
    pub insert_breadth: usize,
    /// Beam width used when a search passes no breadth.
    pub search_breadth: usize,
}

impl Default for GraphParams {
    fn default() -> Self {
        Self {
            out_degree: 16,
            insert_breadth: 64,
            search_breadth: 40,
        }
    }
}

impl GraphParams {
    /// Sparser graph, cheaper build.
    pub fn fast() -> Self {
        Self {
            out_degree: 8,
            insert_breadth: 32,
            search_breadth: 20,
        }
    }

    /// Denser graph, higher recall.
    pub fn high_accuracy() -> Self {
        Self {
            out_degree: 32,
            insert_breadth: 128,
            search_breadth: 100,
        }
    }
}

/// Construction-time configuration of one index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    /// Vector dimensionality. For binary indexes, the number of bits.
    pub dimension: usize,
    /// Inverted lists (nlist). Ignored by the graph.
    pub partitions: usize,
    /// Product-quantizer subvectors (m). Ignored by the binary index.
    pub subvectors: usize,
    /// Bits per subvector code (nbits). Ignored by the binary index.
    pub bits_per_code: usize,
    pub method: MethodType,
    /// Ignored by the binary index, which always uses Hamming distance.
    pub metric: MetricType,
    pub train: TrainParams,
    pub graph: GraphParams,
}

impl IndexDescriptor {
    /// Descriptor for a product-quantized IVF index.
    pub fn quantized_ivf(
        dimension: usize,
        partitions: usize,
        subvectors: usize,
        bits_per_code: usize,
        metric: MetricType,
    ) -> Self {
        Self {
            dimension,
            partitions,
            subvectors,
            bits_per_code,
            method: MethodType::QuantizedIvf,
            metric,
            train: TrainParams::default(),
            graph: GraphParams::default(),
        }
    }

    /// Descriptor for a binary IVF index over `bits`-wide codes.
    pub fn binary_ivf(bits: usize, partitions: usize) -> Self {
        Self {
            dimension: bits,
            partitions,
            subvectors: 0,
            bits_per_code: 0,
            method: MethodType::BinaryIvf,
            metric: MetricType::L2,
            train: TrainParams::default(),
            graph: GraphParams::default(),
        }
    }

    /// Descriptor for a quantized graph index.
    pub fn quantized_graph(
        dimension: usize,
        subvectors: usize,
        bits_per_code: usize,
        metric: MetricType,
    ) -> Self {
        Self {
            dimension,
            partitions: 0,
            subvectors,
            bits_per_code,
            method: MethodType::QuantizedGraph,
            metric,
            train: TrainParams::default(),
            graph: GraphParams::default(),
        }
    }

    /// Build a descriptor from raw boundary values.
    ///
    /// Enum values are checked first (method, then metric) so an
    /// unrecognized value is reported as such even when the numeric
    /// parameters are also wrong.
    pub fn from_raw(
        dimension: i64,
        partitions: i64,
        subvectors: i64,
        bits_per_code: i64,
        method_type: i32,
        metric_type: i32,
    ) -> Result<Self> {
        let method = MethodType::from_raw(method_type).ok_or(HandleError::InvalidMethod(method_type))?;
        let metric = MetricType::from_raw(metric_type).ok_or(HandleError::InvalidMetric(metric_type))?;

        let descriptor = Self {
            dimension: non_negative("dimension", dimension)?,
            partitions: non_negative("partitions", partitions)?,
            subvectors: non_negative("subvectors", subvectors)?,
            bits_per_code: non_negative("bits_per_code", bits_per_code)?,
            method,
            metric,
            train: TrainParams::default(),
            graph: GraphParams::default(),
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn with_train_params(mut self, train: TrainParams) -> Self {
        self.train = train;
        self
    }

    pub fn with_graph_params(mut self, graph: GraphParams) -> Self {
        self.graph = graph;
        self
    }

    /// Check the numeric parameters against the selected method.
    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(invalid("dimension must be positive"));
        }
        if self.train.iterations == 0 {
            return Err(invalid("k-means iterations must be positive"));
        }

        match self.method {
            MethodType::QuantizedIvf => {
                self.validate_partitions()?;
                self.validate_product_quantizer()
            }
            MethodType::BinaryIvf => {
                self.validate_partitions()?;
                if self.dimension % 8 != 0 {
                    return Err(invalid(format!(
                        "binary dimension ({}) must be a multiple of 8",
                        self.dimension
                    )));
                }
                Ok(())
            }
            MethodType::QuantizedGraph => {
                self.validate_product_quantizer()?;
                if self.graph.out_degree == 0 || self.graph.insert_breadth == 0 {
                    return Err(invalid("graph out_degree and insert_breadth must be positive"));
                }
                Ok(())
            }
        }
    }

    fn validate_partitions(&self) -> Result<()> {
        if self.partitions == 0 || self.partitions > MAX_PARTITIONS {
            return Err(invalid(format!(
                "partitions must be in 1..={MAX_PARTITIONS}, got {}",
                self.partitions
            )));
        }
        Ok(())
    }

    fn validate_product_quantizer(&self) -> Result<()> {
        if self.subvectors == 0 {
            return Err(invalid("subvectors must be positive"));
        }
        if self.dimension % self.subvectors != 0 {
            return Err(invalid(format!(
                "dimension ({}) must be divisible by subvectors ({})",
                self.dimension, self.subvectors
            )));
        }
        if self.bits_per_code == 0 || self.bits_per_code > MAX_BITS_PER_CODE {
            return Err(invalid(format!(
                "bits_per_code must be in 1..={MAX_BITS_PER_CODE}, got {}",
                self.bits_per_code
            )));
        }
        Ok(())
    }
}

fn non_negative(name: &str, value: i64) -> Result<usize> {
    usize::try_from(value).map_err(|_| invalid(format!("{name} must not be negative, got {value}")))
}

fn invalid(message: impl Into<String>) -> HandleError {
    HandleError::InvalidConfiguration(message.into())
}
