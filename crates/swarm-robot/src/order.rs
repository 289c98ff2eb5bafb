//! Orders addressed to a single robot over its OSC link.

use swarm_types::{Command, RobotId, SwarmError};

/// A command a remote controller asked one robot to execute.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityOrder {
    pub robot: RobotId,
    pub command: Command,
}

impl EntityOrder {
    /// Decode a text datagram `<command>[ <value>]`.
    ///
    /// # Errors
    ///
    /// [`SwarmError::Parse`] for an empty datagram, invalid UTF-8, or a
    /// value that is not a finite number.
    pub fn decode(robot: RobotId, bytes: &[u8]) -> Result<Self, SwarmError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| SwarmError::Parse(format!("order from {robot} is not UTF-8: {e}")))?;
        let mut parts = text.split_whitespace();
        let name = parts
            .next()
            .ok_or_else(|| SwarmError::Parse(format!("empty order from {robot}")))?;
        let argument = parts
            .next()
            .map(|raw| {
                let value = raw
                    .parse::<f32>()
                    .map_err(|e| SwarmError::Parse(format!("{name} {raw}: {e}")))?;
                if !value.is_finite() {
                    return Err(SwarmError::Parse(format!("{name} {raw}: value is not finite")));
                }
                Ok(value)
            })
            .transpose()?;
        Ok(Self {
            robot,
            command: Command::new(name, argument),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_command_with_argument() {
        let order = EntityOrder::decode(RobotId(2), b"dx 50\r\n").unwrap();
        assert_eq!(order.robot, RobotId(2));
        assert_eq!(order.command, Command::new("dx", Some(50.0)));
    }

    #[test]
    fn decodes_bare_command() {
        let order = EntityOrder::decode(RobotId(2), b"stop").unwrap();
        assert_eq!(order.command, Command::stop());
    }

    #[test]
    fn rejects_malformed_orders() {
        assert!(EntityOrder::decode(RobotId(1), b"   ").is_err());
        assert!(EntityOrder::decode(RobotId(1), b"dx fast").is_err());
        assert!(EntityOrder::decode(RobotId(1), &[0xff, 0xfe]).is_err());
    }

    #[test]
    fn rejects_non_finite_values() {
        for raw in [&b"dx NaN"[..], b"dx inf", b"dy -inf", b"dx infinity"] {
            assert!(matches!(
                EntityOrder::decode(RobotId(1), raw),
                Err(SwarmError::Parse(_))
            ));
        }
    }
}
