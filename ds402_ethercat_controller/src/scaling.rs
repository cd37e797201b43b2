use std::collections::HashMap;

use ethercat_controller::ConfigError;

pub const TORQUE_FACTOR: &str = "torque_lsb_per_nm";
pub const VELOCITY_FACTOR: &str = "velocity_lsb_per_rad_s";
pub const POSITION_FACTOR: &str = "position_lsb_per_rad";

/// Conversion between engineering units and raw PDO counts.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Scale {
    /// values are raw counts already
    #[default]
    Raw,
    Linear { lsb_per_unit: f64 },
}

impl Scale {
    pub fn to_raw(&self, value: f64) -> f64 {
        match *self {
            Scale::Raw => value,
            Scale::Linear { lsb_per_unit } => value * lsb_per_unit,
        }
    }

    pub fn from_raw(&self, raw: f64) -> f64 {
        match *self {
            Scale::Raw => raw,
            Scale::Linear { lsb_per_unit } => raw / lsb_per_unit,
        }
    }
}

/// Per field group scales: torque (N.m), velocity (rad/s), position (rad).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Scaling {
    pub torque: Scale,
    pub velocity: Scale,
    pub position: Scale,
}

impl Scaling {
    /// Build from the `scaling` map of a slave entry. Groups without a
    /// factor stay raw.
    pub fn from_factors(slave: &str, factors: &HashMap<String, f64>) -> Result<Self, ConfigError> {
        let mut scaling = Scaling::default();
        for (name, &factor) in factors {
            let group = match name.as_str() {
                TORQUE_FACTOR => &mut scaling.torque,
                VELOCITY_FACTOR => &mut scaling.velocity,
                POSITION_FACTOR => &mut scaling.position,
                _ => {
                    return Err(ConfigError::InvalidScaling {
                        slave: slave.to_string(),
                        factor: name.clone(),
                        reason: format!(
                            "unknown factor, expected one of {}, {}, {}",
                            TORQUE_FACTOR, VELOCITY_FACTOR, POSITION_FACTOR
                        ),
                    })
                }
            };
            if !factor.is_finite() || factor <= 0.0 {
                return Err(ConfigError::InvalidScaling {
                    slave: slave.to_string(),
                    factor: name.clone(),
                    reason: format!("{} must be finite and greater than 0", factor),
                });
            }
            *group = Scale::Linear {
                lsb_per_unit: factor,
            };
        }
        Ok(scaling)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factors(entries: &[(&str, f64)]) -> HashMap<String, f64> {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn absent_factors_are_raw() {
        let scaling = Scaling::from_factors("a", &HashMap::new()).unwrap();
        assert_eq!(scaling, Scaling::default());
        assert_eq!(scaling.torque.to_raw(1.25), 1.25);
    }

    #[test]
    fn linear_factors() {
        let scaling = Scaling::from_factors(
            "a",
            &factors(&[(TORQUE_FACTOR, 10.0), (POSITION_FACTOR, 10000.0)]),
        )
        .unwrap();
        assert_eq!(scaling.torque.to_raw(1.5), 15.0);
        assert_eq!(scaling.position.from_raw(5000.0), 0.5);
        assert_eq!(scaling.velocity, Scale::Raw);
    }

    #[test]
    fn invalid_factors() {
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let err = Scaling::from_factors("a", &factors(&[(VELOCITY_FACTOR, bad)])).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidScaling { .. }));
        }
        let err =
            Scaling::from_factors("a", &factors(&[("current_lsb_per_a", 1.0)])).unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidScaling { factor, .. } if factor == "current_lsb_per_a")
        );
    }
}
