use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("`{field}` must be positive (got {value})")]
    NonPositive { field: &'static str, value: f64 },
    #[error("via diameter {diameter} must exceed drill {drill}")]
    ViaRing { drill: f64, diameter: f64 },
    #[error("allowed layer list is empty")]
    NoLayers,
    #[error("net class `{0}` declared twice")]
    DuplicateClass(String),
    #[error("net class `{class}`: {reason}")]
    NetClass { class: String, reason: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub rules: DesignRules,
    #[serde(default)]
    pub net_classes: Vec<NetClassRouting>,
    #[serde(default)]
    pub negotiated: NegotiatedConfig,
    #[serde(default)]
    pub global_routing: GlobalRoutingConfig,
    #[serde(default)]
    pub sparse: SparseConfig,
    #[serde(default)]
    pub monte_carlo: MonteCarloConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub input: InputConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rules.validate()?;
        let mut seen = std::collections::HashSet::new();
        for class in &self.net_classes {
            if !seen.insert(class.name.as_str()) {
                return Err(ConfigError::DuplicateClass(class.name.clone()));
            }
            class.validate()?;
        }
        Ok(())
    }

    /// Net class governing `net_name`: an explicit board assignment wins, then class membership lists.
    pub fn class_for(&self, net_name: &str, assigned: Option<&str>) -> Option<&NetClassRouting> {
        if let Some(name) = assigned {
            if let Some(class) = self.net_classes.iter().find(|c| c.name == name) {
                return Some(class);
            }
        }
        self.net_classes
            .iter()
            .find(|c| c.nets.iter().any(|n| n == net_name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeuristicKind {
    Manhattan,
    DirectionBias,
    #[default]
    CongestionAware,
    WeightedCongestion,
    Greedy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignRules {
    #[serde(default = "default_trace_width")]
    pub trace_width: f64,
    #[serde(default = "default_clearance")]
    pub clearance: f64,
    #[serde(default = "default_via_drill")]
    pub via_drill: f64,
    #[serde(default = "default_via_diameter")]
    pub via_diameter: f64,
    #[serde(default = "default_clearance")]
    pub via_clearance: f64,
    #[serde(default = "default_grid_resolution")]
    pub grid_resolution: f64,

    #[serde(default = "default_cost_straight")]
    pub cost_straight: f64,
    #[serde(default = "default_cost_diagonal")]
    pub cost_diagonal: f64,
    #[serde(default = "default_cost_turn")]
    pub cost_turn: f64,
    #[serde(default = "default_cost_via")]
    pub cost_via: f64,
    #[serde(default = "default_cost_congestion")]
    pub cost_congestion: f64,
    /// Step cost multiplier inside a same-net copper pour.
    #[serde(default = "default_cost_zone")]
    pub cost_zone: f64,
    #[serde(default = "default_congestion_threshold")]
    pub congestion_threshold: f64,

    /// Clearance override keyed by component reference.
    #[serde(default)]
    pub component_clearances: HashMap<String, f64>,
    #[serde(default)]
    pub fine_pitch_clearance: Option<f64>,
    /// Same-component pad spacing below which pads count as fine pitch.
    #[serde(default = "default_fine_pitch_threshold")]
    pub fine_pitch_threshold: f64,
    /// Hard allow-list of routable layers. `None` means all.
    #[serde(default)]
    pub allowed_layers: Option<Vec<u8>>,

    #[serde(default = "default_true")]
    pub allow_diagonal: bool,
    #[serde(default)]
    pub heuristic: HeuristicKind,
    #[serde(default = "default_heuristic_weight")]
    pub heuristic_weight: f64,
    #[serde(default = "default_greedy_factor")]
    pub greedy_factor: f64,
    /// Fraction of `cost_turn` the direction-aware heuristics charge for facing away from the goal.
    #[serde(default = "default_direction_bias")]
    pub direction_bias: f64,
    /// Manhattan distance (mm) above which bidirectional search is tried first.
    #[serde(default = "default_bidirectional_threshold")]
    pub bidirectional_threshold: f64,
    #[serde(default = "default_max_expansions")]
    pub max_expansions: usize,
    /// Margin (mm) added around both pads to form the first search window.
    #[serde(default = "default_search_margin")]
    pub search_margin: f64,

    #[serde(default = "default_true")]
    pub neck_down: bool,
    #[serde(default = "default_neck_down_length")]
    pub neck_down_length: f64,
    #[serde(default = "default_neck_down_width")]
    pub neck_down_width: f64,

    /// Extra step cost outside the active net's corridor.
    #[serde(default = "default_corridor_penalty")]
    pub corridor_penalty: f64,
    /// Edge length in cells of one congestion-grid block.
    #[serde(default = "default_congestion_block")]
    pub congestion_block: usize,
}

impl Default for DesignRules {
    fn default() -> Self {
        Self {
            trace_width: default_trace_width(),
            clearance: default_clearance(),
            via_drill: default_via_drill(),
            via_diameter: default_via_diameter(),
            via_clearance: default_clearance(),
            grid_resolution: default_grid_resolution(),
            cost_straight: default_cost_straight(),
            cost_diagonal: default_cost_diagonal(),
            cost_turn: default_cost_turn(),
            cost_via: default_cost_via(),
            cost_congestion: default_cost_congestion(),
            cost_zone: default_cost_zone(),
            congestion_threshold: default_congestion_threshold(),
            component_clearances: HashMap::new(),
            fine_pitch_clearance: None,
            fine_pitch_threshold: default_fine_pitch_threshold(),
            allowed_layers: None,
            allow_diagonal: true,
            heuristic: HeuristicKind::default(),
            heuristic_weight: default_heuristic_weight(),
            greedy_factor: default_greedy_factor(),
            direction_bias: default_direction_bias(),
            bidirectional_threshold: default_bidirectional_threshold(),
            max_expansions: default_max_expansions(),
            search_margin: default_search_margin(),
            neck_down: true,
            neck_down_length: default_neck_down_length(),
            neck_down_width: default_neck_down_width(),
            corridor_penalty: default_corridor_penalty(),
            congestion_block: default_congestion_block(),
        }
    }
}

impl DesignRules {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("trace_width", self.trace_width),
            ("via_drill", self.via_drill),
            ("via_diameter", self.via_diameter),
            ("grid_resolution", self.grid_resolution),
            ("cost_straight", self.cost_straight),
            ("cost_diagonal", self.cost_diagonal),
            ("heuristic_weight", self.heuristic_weight),
            ("greedy_factor", self.greedy_factor),
        ];
        for (field, value) in positive {
            if !(value > 0.0) {
                return Err(ConfigError::NonPositive { field, value });
            }
        }
        let non_negative = [
            ("clearance", self.clearance),
            ("via_clearance", self.via_clearance),
            ("cost_turn", self.cost_turn),
            ("cost_via", self.cost_via),
            ("cost_congestion", self.cost_congestion),
            ("cost_zone", self.cost_zone),
            ("corridor_penalty", self.corridor_penalty),
        ];
        for (field, value) in non_negative {
            if value < 0.0 || value.is_nan() {
                return Err(ConfigError::NonPositive { field, value });
            }
        }
        for (_, &value) in &self.component_clearances {
            if value < 0.0 {
                return Err(ConfigError::NonPositive {
                    field: "component_clearances",
                    value,
                });
            }
        }
        if self.via_diameter <= self.via_drill {
            return Err(ConfigError::ViaRing {
                drill: self.via_drill,
                diameter: self.via_diameter,
            });
        }
        if let Some(layers) = &self.allowed_layers {
            if layers.is_empty() {
                return Err(ConfigError::NoLayers);
            }
        }
        if self.congestion_block == 0 {
            return Err(ConfigError::NonPositive {
                field: "congestion_block",
                value: 0.0,
            });
        }
        Ok(())
    }

    /// Clearance a pad of `reference` demands, or `None` when the default applies.
    pub fn pad_clearance(&self, reference: &str, fine_pitch: bool) -> Option<f64> {
        if let Some(&c) = self.component_clearances.get(reference) {
            return Some(c);
        }
        if fine_pitch {
            return self.fine_pitch_clearance;
        }
        None
    }

    pub fn layer_allowed(&self, layer: u8) -> bool {
        match &self.allowed_layers {
            Some(list) => list.contains(&layer),
            None => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LengthConstraint {
    #[serde(default)]
    pub min_length: Option<f64>,
    #[serde(default)]
    pub max_length: Option<f64>,
    #[serde(default)]
    pub tolerance: f64,
    /// Nets sharing a match group must have lengths within `tolerance` of each other.
    #[serde(default)]
    pub match_group: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetClassRouting {
    pub name: String,
    /// Lower routes first.
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default)]
    pub nets: Vec<String>,
    #[serde(default)]
    pub trace_width: Option<f64>,
    #[serde(default)]
    pub clearance: Option<f64>,
    #[serde(default)]
    pub via_drill: Option<f64>,
    #[serde(default)]
    pub via_diameter: Option<f64>,
    #[serde(default = "default_cost_multiplier")]
    pub cost_multiplier: f64,
    #[serde(default)]
    pub preferred_layers: Vec<u8>,
    #[serde(default)]
    pub avoided_layers: Vec<u8>,
    #[serde(default)]
    pub length: Option<LengthConstraint>,
}

impl NetClassRouting {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: default_priority(),
            nets: Vec::new(),
            trace_width: None,
            clearance: None,
            via_drill: None,
            via_diameter: None,
            cost_multiplier: default_cost_multiplier(),
            preferred_layers: Vec::new(),
            avoided_layers: Vec::new(),
            length: None,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let err = |reason: &str| ConfigError::NetClass {
            class: self.name.clone(),
            reason: reason.to_string(),
        };
        for v in [self.trace_width, self.via_drill, self.via_diameter]
            .into_iter()
            .flatten()
        {
            if !(v > 0.0) {
                return Err(err("geometry overrides must be positive"));
            }
        }
        if self.clearance.is_some_and(|c| c < 0.0) {
            return Err(err("clearance must not be negative"));
        }
        if !(self.cost_multiplier > 0.0) {
            return Err(err("cost multiplier must be positive"));
        }
        if let Some(len) = &self.length {
            if let (Some(lo), Some(hi)) = (len.min_length, len.max_length) {
                if lo > hi {
                    return Err(err("min_length exceeds max_length"));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiatedConfig {
    #[serde(default = "default_neg_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_initial_present")]
    pub initial_present_factor: f64,
    #[serde(default = "default_present_multiplier")]
    pub present_factor_multiplier: f64,
    #[serde(default = "default_history_increment")]
    pub history_increment: f64,
    /// History is multiplied by this each iteration (1.0 keeps it).
    #[serde(default = "default_history_decay")]
    pub history_decay: f64,
    #[serde(default = "default_max_ripups")]
    pub max_ripups_per_net: usize,
}

impl Default for NegotiatedConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_neg_iterations(),
            initial_present_factor: default_initial_present(),
            present_factor_multiplier: default_present_multiplier(),
            history_increment: default_history_increment(),
            history_decay: default_history_decay(),
            max_ripups_per_net: default_max_ripups(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalRoutingConfig {
    /// Region edge length in mm.
    #[serde(default = "default_region_size")]
    pub region_size: f64,
    #[serde(default = "default_congestion_weight")]
    pub congestion_weight: f64,
    #[serde(default = "default_gr_heuristic")]
    pub heuristic_weight: f64,
    #[serde(default = "default_corridor_half_width")]
    pub corridor_half_width: f64,
}

impl Default for GlobalRoutingConfig {
    fn default() -> Self {
        Self {
            region_size: default_region_size(),
            congestion_weight: default_congestion_weight(),
            heuristic_weight: default_gr_heuristic(),
            corridor_half_width: default_corridor_half_width(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SparseConfig {
    /// Samples per obstacle clearance contour.
    #[serde(default = "default_contour_samples")]
    pub contour_samples: usize,
    /// Spacing (mm) of the interior hop grid.
    #[serde(default = "default_interior_spacing")]
    pub interior_spacing: f64,
    /// Visibility edges longer than this (mm) are not built.
    #[serde(default = "default_max_edge_length")]
    pub max_edge_length: f64,
    #[serde(default = "default_corridor_half_width")]
    pub corridor_half_width: f64,
}

impl Default for SparseConfig {
    fn default() -> Self {
        Self {
            contour_samples: default_contour_samples(),
            interior_spacing: default_interior_spacing(),
            max_edge_length: default_max_edge_length(),
            corridor_half_width: default_corridor_half_width(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonteCarloConfig {
    #[serde(default = "default_trials")]
    pub trials: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_true")]
    pub parallel: bool,
    /// Worker threads; 0 picks the rayon default.
    #[serde(default)]
    pub threads: usize,
    #[serde(default = "default_via_penalty")]
    pub via_penalty: f64,
    #[serde(default = "default_length_penalty")]
    pub length_penalty: f64,
    /// Run each trial with negotiated congestion instead of the standard pass.
    #[serde(default)]
    pub negotiated: bool,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            trials: default_trials(),
            seed: default_seed(),
            parallel: true,
            threads: 0,
            via_penalty: default_via_penalty(),
            length_penalty: default_length_penalty(),
            negotiated: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    Standard,
    Negotiated,
    Hierarchical,
    TwoPhase,
    MonteCarlo,
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.replace('-', "_").as_str() {
            "standard" => Ok(Strategy::Standard),
            "negotiated" => Ok(Strategy::Negotiated),
            "hierarchical" => Ok(Strategy::Hierarchical),
            "two_phase" => Ok(Strategy::TwoPhase),
            "monte_carlo" => Ok(Strategy::MonteCarlo),
            other => Err(format!("unknown strategy `{}`", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    #[default]
    Mst,
    Star,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default)]
    pub topology: Topology,
    /// Wall-clock budget in seconds.
    #[serde(default)]
    pub timeout_secs: Option<f64>,
    #[serde(default = "default_true")]
    pub targeted_ripup: bool,
    /// Hierarchical strategy: run the detailed phase negotiated.
    #[serde(default = "default_true")]
    pub negotiated_detail: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            topology: Topology::default(),
            timeout_secs: None,
            targeted_ripup: true,
            negotiated_detail: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    #[serde(default = "default_board_file")]
    pub board_file: String,
    #[serde(default = "default_output_file")]
    pub output_file: String,
    #[serde(default)]
    pub image_file: Option<String>,
    #[serde(default = "default_image_size")]
    pub image_size: u32,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            board_file: default_board_file(),
            output_file: default_output_file(),
            image_file: None,
            image_size: default_image_size(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_trace_width() -> f64 {
    0.2
}

fn default_clearance() -> f64 {
    0.2
}

fn default_via_drill() -> f64 {
    0.3
}

fn default_via_diameter() -> f64 {
    0.6
}

fn default_grid_resolution() -> f64 {
    0.1
}

fn default_cost_straight() -> f64 {
    1.0
}

fn default_cost_diagonal() -> f64 {
    std::f64::consts::SQRT_2
}

fn default_cost_turn() -> f64 {
    0.5
}

fn default_cost_via() -> f64 {
    10.0
}

fn default_cost_congestion() -> f64 {
    2.0
}

fn default_cost_zone() -> f64 {
    0.5
}

fn default_congestion_threshold() -> f64 {
    0.5
}

fn default_fine_pitch_threshold() -> f64 {
    0.65
}

fn default_heuristic_weight() -> f64 {
    1.0
}

fn default_greedy_factor() -> f64 {
    1.5
}

fn default_direction_bias() -> f64 {
    0.3
}

fn default_bidirectional_threshold() -> f64 {
    40.0
}

fn default_max_expansions() -> usize {
    400_000
}

fn default_search_margin() -> f64 {
    3.0
}

fn default_neck_down_length() -> f64 {
    0.5
}

fn default_neck_down_width() -> f64 {
    0.15
}

fn default_corridor_penalty() -> f64 {
    2.0
}

fn default_congestion_block() -> usize {
    8
}

fn default_priority() -> i32 {
    100
}

fn default_cost_multiplier() -> f64 {
    1.0
}

fn default_neg_iterations() -> usize {
    30
}

fn default_initial_present() -> f64 {
    0.5
}

fn default_present_multiplier() -> f64 {
    1.8
}

fn default_history_increment() -> f64 {
    1.0
}

fn default_history_decay() -> f64 {
    1.0
}

fn default_max_ripups() -> usize {
    6
}

fn default_region_size() -> f64 {
    5.0
}

fn default_congestion_weight() -> f64 {
    3.0
}

fn default_gr_heuristic() -> f64 {
    1.0
}

fn default_corridor_half_width() -> f64 {
    1.5
}

fn default_contour_samples() -> usize {
    8
}

fn default_interior_spacing() -> f64 {
    5.0
}

fn default_max_edge_length() -> f64 {
    25.0
}

fn default_trials() -> usize {
    8
}

fn default_seed() -> u64 {
    42
}

fn default_via_penalty() -> f64 {
    1.0
}

fn default_length_penalty() -> f64 {
    0.05
}

fn default_board_file() -> String {
    "inputs/board.toml".to_string()
}

fn default_output_file() -> String {
    "output/routes.toml".to_string()
}

fn default_image_size() -> u32 {
    2000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.rules.trace_width, 0.2);
        assert_eq!(config.rules.heuristic, HeuristicKind::CongestionAware);
        assert_eq!(config.session.strategy, Strategy::Standard);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [rules]
            clearance = 0.15
            heuristic = "greedy"

            [session]
            strategy = "two_phase"

            [[net_classes]]
            name = "power"
            priority = 1
            trace_width = 0.5
            nets = ["VCC", "GND"]
            "#,
        )
        .unwrap();
        assert_eq!(config.rules.clearance, 0.15);
        assert_eq!(config.rules.via_clearance, 0.2);
        assert_eq!(config.rules.heuristic, HeuristicKind::Greedy);
        assert_eq!(config.session.strategy, Strategy::TwoPhase);
        assert_eq!(config.class_for("GND", None).map(|c| c.priority), Some(1));
        assert!(config.class_for("SIG", None).is_none());
    }

    #[test]
    fn validation_rejects_bad_geometry() {
        let mut rules = DesignRules::default();
        rules.trace_width = 0.0;
        assert!(matches!(
            rules.validate(),
            Err(ConfigError::NonPositive { field: "trace_width", .. })
        ));

        let mut rules = DesignRules::default();
        rules.via_diameter = 0.25;
        assert!(matches!(rules.validate(), Err(ConfigError::ViaRing { .. })));

        let mut config = Config::default();
        config.net_classes.push(NetClassRouting::new("a"));
        config.net_classes.push(NetClassRouting::new("a"));
        assert_eq!(
            config.validate(),
            Err(ConfigError::DuplicateClass("a".to_string()))
        );
    }

    #[test]
    fn pad_clearance_precedence() {
        let mut rules = DesignRules::default();
        rules.fine_pitch_clearance = Some(0.1);
        rules.component_clearances.insert("U1".to_string(), 0.3);
        assert_eq!(rules.pad_clearance("U1", true), Some(0.3));
        assert_eq!(rules.pad_clearance("U2", true), Some(0.1));
        assert_eq!(rules.pad_clearance("U2", false), None);
        assert_eq!("two-phase".parse::<Strategy>(), Ok(Strategy::TwoPhase));
    }
}
