use pcb_common::util::config::ConfigError;
use thiserror::Error;

/// Session-level setup failures. Per-net problems never surface here.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("board has no nets with two or more pads")]
    EmptyBoard,
    #[error("board has no routable copper layers")]
    NoRoutableLayers,
    #[error("invalid design rules: {0}")]
    InvalidRules(#[from] ConfigError),
    #[error("routing grid of {cells} cells exceeds the limit of {limit}")]
    GridTooLarge { cells: u64, limit: u64 },
    #[error("board has {layers} copper layers, at most {max} are supported")]
    TooManyLayers { layers: u8, max: u8 },
    #[error("pad {reference}.{pin} is on layer {layer}, board has {layer_count}")]
    PadLayerOutOfRange {
        reference: String,
        pin: String,
        layer: u8,
        layer_count: u8,
    },
}

/// Outcome of one point-to-point search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("no path exists between the pads")]
    NotFound,
    #[error("every grid path found violated exact clearance")]
    InvalidGeometry,
    #[error("search budget exhausted")]
    Timeout,
    #[error("pad has no accessible cell")]
    NoAccess,
    #[error("pads share no routable layer and vias are unavailable")]
    LayerConflict,
}
