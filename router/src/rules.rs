use pcb_common::db::core::{Board, Net};
use pcb_common::db::indices::NetId;
use pcb_common::util::config::{Config, LengthConstraint};

/// Multiplier on step cost for a layer outside a net class's preferred list.
const NON_PREFERRED_LAYER_COST: f64 = 1.5;
const AVOIDED_LAYER_COST: f64 = 3.0;

/// Design rules resolved for one net (defaults overlaid with its net class).
#[derive(Clone, Debug)]
pub struct NetParams {
    pub net: NetId,
    pub name: String,
    pub class: Option<String>,
    pub priority: i32,
    pub trace_width: f64,
    pub clearance: f64,
    pub via_drill: f64,
    pub via_diameter: f64,
    pub via_clearance: f64,
    pub cost_multiplier: f64,
    /// Step cost multiplier per copper layer.
    pub layer_cost: Vec<f64>,
    pub length: Option<LengthConstraint>,
}

impl NetParams {
    pub fn resolve(net: &Net, config: &Config, layer_count: u8) -> Self {
        let rules = &config.rules;
        let class = config.class_for(&net.name, net.class.as_deref());

        let mut layer_cost = vec![1.0; layer_count as usize];
        if let Some(class) = class {
            if !class.preferred_layers.is_empty() {
                for (l, cost) in layer_cost.iter_mut().enumerate() {
                    if !class.preferred_layers.contains(&(l as u8)) {
                        *cost = NON_PREFERRED_LAYER_COST;
                    }
                }
            }
            for &l in &class.avoided_layers {
                if let Some(cost) = layer_cost.get_mut(l as usize) {
                    *cost = AVOIDED_LAYER_COST;
                }
            }
        }

        let clearance = class.and_then(|c| c.clearance).unwrap_or(rules.clearance);
        Self {
            net: net.id,
            name: net.name.clone(),
            class: class.map(|c| c.name.clone()),
            priority: class.map_or(i32::MAX, |c| c.priority),
            trace_width: class.and_then(|c| c.trace_width).unwrap_or(rules.trace_width),
            clearance,
            via_drill: class.and_then(|c| c.via_drill).unwrap_or(rules.via_drill),
            via_diameter: class
                .and_then(|c| c.via_diameter)
                .unwrap_or(rules.via_diameter),
            via_clearance: rules.via_clearance.max(clearance),
            cost_multiplier: class.map_or(1.0, |c| c.cost_multiplier),
            layer_cost,
            length: class.and_then(|c| c.length.clone()),
        }
    }

    pub fn for_board(board: &Board, config: &Config) -> Vec<NetParams> {
        board
            .nets
            .iter()
            .map(|n| NetParams::resolve(n, config, board.layer_count))
            .collect()
    }

    #[inline]
    pub fn layer_cost(&self, layer: u8) -> f64 {
        self.layer_cost.get(layer as usize).copied().unwrap_or(1.0)
    }
}
