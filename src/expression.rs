use std::collections::BTreeMap;

use crate::{binding::ModelBinding, core::ParamHandle};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Blend {
    #[default]
    Add,
    Multiply,
    Overwrite,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ExpressionParam {
    pub param: String,
    pub value: f32,
    pub blend: Blend,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Expression {
    pub name: String,
    pub params: Vec<ExpressionParam>,
}

/// Fade in/out rate, weight units per second.
const FADE_SPEED: f32 = 3.0;
const WEIGHT_EPSILON: f32 = 1e-3;

#[derive(Clone, Debug)]
struct BoundExpression {
    expression: Expression,
    handles: Vec<Option<ParamHandle>>,
}

/// At most one expression is tracked at a time; its weight ramps toward 1
/// while fading in and toward 0 while fading out, and reaching 0 on the way
/// out clears the identity.
#[derive(Clone, Debug, Default)]
pub struct ExpressionLayer {
    expressions: BTreeMap<String, BoundExpression>,
    current: Option<String>,
    weight: f32,
    fading_in: bool,
}

impl ExpressionLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.expressions.clear();
        self.current = None;
        self.weight = 0.0;
        self.fading_in = false;
    }

    pub fn load(&mut self, expressions: Vec<Expression>, binding: &dyn ModelBinding) {
        self.reset();
        for expression in expressions {
            let handles = expression
                .params
                .iter()
                .map(|p| {
                    let handle = binding.param_index(&p.param);
                    if handle.is_none() {
                        tracing::debug!(param = %p.param, "expression targets unknown parameter");
                    }
                    handle
                })
                .collect();
            self.expressions.insert(
                expression.name.clone(),
                BoundExpression {
                    expression,
                    handles,
                },
            );
        }
    }

    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn weight(&self) -> f32 {
        self.weight
    }

    /// Empty id starts the fade-out of whatever is showing; an unknown id is
    /// a silent no-op; re-setting the current id keeps the fade progress.
    pub fn set(&mut self, id: &str) {
        if id.is_empty() {
            if self.current.is_some() {
                self.fading_in = false;
            }
            return;
        }
        if !self.expressions.contains_key(id) {
            tracing::debug!(id, "unknown expression");
            return;
        }
        if self.current.as_deref() != Some(id) {
            self.current = Some(id.to_string());
            self.weight = 0.0;
        }
        self.fading_in = true;
    }

    pub fn advance(&mut self, dt: f32, binding: &mut dyn ModelBinding) {
        if self.current.is_none() {
            return;
        }

        if self.fading_in {
            self.weight = (self.weight + dt * FADE_SPEED).min(1.0);
        } else {
            self.weight -= dt * FADE_SPEED;
            if self.weight <= 0.0 {
                self.weight = 0.0;
                self.current = None;
                return;
            }
        }

        if self.weight <= WEIGHT_EPSILON {
            return;
        }

        let Some(bound) = self.current.as_deref().and_then(|id| self.expressions.get(id)) else {
            return;
        };

        let w = self.weight;
        let params = binding.params_mut();
        for (ep, handle) in bound.expression.params.iter().zip(&bound.handles) {
            let Some(ParamHandle(idx)) = *handle else {
                continue;
            };
            let value = params.values[idx];
            let blended = match ep.blend {
                Blend::Add => value + ep.value * w,
                Blend::Multiply => value * (1.0 + (ep.value - 1.0) * w),
                Blend::Overwrite => value * (1.0 - w) + ep.value * w,
            };
            params.values[idx] = blended.clamp(params.minimums[idx], params.maximums[idx]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::MemoryModel;

    fn layer_with(model: &MemoryModel, params: Vec<ExpressionParam>) -> ExpressionLayer {
        let mut layer = ExpressionLayer::new();
        layer.load(
            vec![Expression {
                name: "smile".to_string(),
                params,
            }],
            model,
        );
        layer
    }

    fn overwrite_param(value: f32) -> ExpressionParam {
        ExpressionParam {
            param: "P".to_string(),
            value,
            blend: Blend::Overwrite,
        }
    }

    #[test]
    fn unknown_expression_is_a_no_op() {
        let model = MemoryModel::new();
        let mut layer = layer_with(&model, vec![]);
        layer.set("missing");
        assert_eq!(layer.current(), None);
    }

    #[test]
    fn resetting_same_id_keeps_fade_progress() {
        let mut model = MemoryModel::new();
        model.add_param("P", 0.0, 0.0, 1.0);
        let mut layer = layer_with(&model, vec![overwrite_param(1.0)]);

        layer.set("smile");
        layer.advance(0.1, &mut model);
        let w = layer.weight();
        assert!(w > 0.0);
        layer.set("smile");
        assert_eq!(layer.weight(), w);
    }

    #[test]
    fn fade_out_clears_identity_at_zero() {
        let mut model = MemoryModel::new();
        model.add_param("P", 0.0, 0.0, 1.0);
        let mut layer = layer_with(&model, vec![overwrite_param(1.0)]);

        layer.set("smile");
        layer.advance(1.0, &mut model); // fully faded in
        assert_eq!(layer.weight(), 1.0);

        layer.set("");
        for _ in 0..10 {
            layer.advance(0.1, &mut model);
        }
        assert_eq!(layer.current(), None);
        assert_eq!(layer.weight(), 0.0);
    }

    #[test]
    fn blend_modes_apply_at_full_weight() {
        let mut model = MemoryModel::new();
        let a = model.add_param("A", 0.2, -5.0, 5.0);
        let m = model.add_param("M", 0.5, -5.0, 5.0);
        let o = model.add_param("O", 0.5, -5.0, 5.0);

        let mut layer = ExpressionLayer::new();
        layer.load(
            vec![Expression {
                name: "e".to_string(),
                params: vec![
                    ExpressionParam {
                        param: "A".to_string(),
                        value: 0.3,
                        blend: Blend::Add,
                    },
                    ExpressionParam {
                        param: "M".to_string(),
                        value: 2.0,
                        blend: Blend::Multiply,
                    },
                    ExpressionParam {
                        param: "O".to_string(),
                        value: -1.0,
                        blend: Blend::Overwrite,
                    },
                ],
            }],
            &model,
        );

        layer.set("e");
        layer.advance(1.0, &mut model);
        let values = model.param_values();
        assert!((values[a.0] - 0.5).abs() < 1e-6);
        assert!((values[m.0] - 1.0).abs() < 1e-6);
        assert!((values[o.0] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn application_clamps_to_bounds() {
        let mut model = MemoryModel::new();
        let p = model.add_param("P", 0.9, 0.0, 1.0);
        let mut layer = layer_with(
            &model,
            vec![ExpressionParam {
                param: "P".to_string(),
                value: 5.0,
                blend: Blend::Add,
            }],
        );
        layer.set("smile");
        layer.advance(1.0, &mut model);
        assert_eq!(model.param_values()[p.0], 1.0);
    }
}
