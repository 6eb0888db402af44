//! Slot identifiers and mode enums.
//!
//! Every actuator or sensor slot is addressed by a small stable id that is
//! unique within its logical interface. The raw `u8` conversions return
//! `None` for out-of-range values so callers can map them to a usage error.

use serde::{Deserialize, Serialize};

/// Logical interface: the local controller or one of its chained extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum InterfaceId {
    /// The controller the link is connected to.
    LocalIo = 0,
    /// Extension 1
    RemoteIo1 = 1,
    /// Extension 2
    RemoteIo2 = 2,
    /// Extension 3
    RemoteIo3 = 3,
    /// Extension 4
    RemoteIo4 = 4,
    /// Extension 5
    RemoteIo5 = 5,
    /// Extension 6
    RemoteIo6 = 6,
    /// Extension 7
    RemoteIo7 = 7,
    /// Extension 8
    RemoteIo8 = 8,
}

impl InterfaceId {
    /// Convert from raw `u8` value. Returns `None` for invalid values.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::LocalIo),
            1 => Some(Self::RemoteIo1),
            2 => Some(Self::RemoteIo2),
            3 => Some(Self::RemoteIo3),
            4 => Some(Self::RemoteIo4),
            5 => Some(Self::RemoteIo5),
            6 => Some(Self::RemoteIo6),
            7 => Some(Self::RemoteIo7),
            8 => Some(Self::RemoteIo8),
            _ => None,
        }
    }

    /// Array index of this interface.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocalIo => write!(f, "local"),
            other => write!(f, "ext{}", *other as u8),
        }
    }
}

macro_rules! slot_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal, [$($variant:ident = $value:literal),+ $(,)?]) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[repr(u8)]
        pub enum $name {
            $(
                #[allow(missing_docs)]
                $variant = $value,
            )+
        }

        impl $name {
            /// All slots in index order.
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            /// Convert from a zero-based raw index. Returns `None` when out of range.
            #[inline]
            pub const fn from_u8(value: u8) -> Option<Self> {
                match value {
                    $($value => Some(Self::$variant),)+
                    _ => None,
                }
            }

            /// Zero-based array index of this slot.
            #[inline]
            pub const fn index(self) -> usize {
                self as usize
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}{}", $prefix, *self as u8 + 1)
            }
        }
    };
}

slot_id!(
    /// Universal input I1..I8.
    Input, "I", [I1 = 0, I2 = 1, I3 = 2, I4 = 3, I5 = 4, I6 = 5, I7 = 6, I8 = 7]
);

slot_id!(
    /// Motor (full bridge) M1..M4.
    Motor, "M", [M1 = 0, M2 = 1, M3 = 2, M4 = 3]
);

slot_id!(
    /// Fast counter C1..C4. Counter `Cn` belongs to the encoder of motor `Mn`.
    Counter, "C", [C1 = 0, C2 = 1, C3 = 2, C4 = 3]
);

slot_id!(
    /// Half-bridge output O1..O8. `O(2n-1)`/`O(2n)` share the pins of motor `Mn`.
    Output, "O", [O1 = 0, O2 = 1, O3 = 2, O4 = 3, O5 = 4, O6 = 5, O7 = 6, O8 = 7]
);

impl Motor {
    /// Encoder counter attached to this motor.
    #[inline]
    pub const fn counter(self) -> Counter {
        match self {
            Self::M1 => Counter::C1,
            Self::M2 => Counter::C2,
            Self::M3 => Counter::C3,
            Self::M4 => Counter::C4,
        }
    }

    /// Index of the first of the two duty slots driving this motor.
    #[inline]
    pub const fn duty_index(self) -> usize {
        2 * self.index()
    }
}

impl Output {
    /// Motor whose bridge pins this output shares.
    #[inline]
    pub const fn motor(self) -> Motor {
        match self.index() / 2 {
            0 => Motor::M1,
            1 => Motor::M2,
            2 => Motor::M3,
            _ => Motor::M4,
        }
    }
}

/// Measurement mode of a universal input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum InputMode {
    /// Voltage, 0..10 V.
    Voltage = 0,
    /// Resistance, 0..5 kOhm.
    #[default]
    Resistance = 1,
    /// Resistance, 0..15 kOhm.
    Resistance2 = 2,
    /// Ultrasonic distance sensor.
    Ultrasonic = 3,
}

impl InputMode {
    /// Convert from raw `u8` value.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Voltage),
            1 => Some(Self::Resistance),
            2 => Some(Self::Resistance2),
            3 => Some(Self::Ultrasonic),
            _ => None,
        }
    }

    /// Whether this mode can be evaluated as a digital (on/off) input.
    pub const fn supports_digital(self) -> bool {
        !matches!(self, Self::Ultrasonic)
    }
}

/// Bridge configuration of a motor slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum MotorMode {
    /// Two independent half bridges (O functionality).
    HalfBridges = 0,
    /// One full bridge (M functionality).
    #[default]
    FullBridge = 1,
}

/// Counting mode of a fast counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CounterMode {
    /// Counts falling edges.
    Inverted = 0,
    /// Counts rising edges.
    #[default]
    Normal = 1,
}

/// Rotation direction for motor commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Clockwise: the first duty slot drives.
    #[default]
    Cw,
    /// Counter-clockwise: the second duty slot drives.
    Ccw,
}

/// Kind of acknowledged action tracked by a command id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Enhanced (distance / synchronized) motor command.
    MotorEx,
    /// Counter reset.
    CounterReset,
}

/// IR receiver channel selected by the remote's switch setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum IrDevice {
    /// Any remote, regardless of switch setting.
    Any = 0,
    /// Switches off/off.
    Switch1 = 1,
    /// Switches on/off.
    Switch2 = 2,
    /// Switches off/on.
    Switch3 = 3,
    /// Switches on/on.
    Switch4 = 4,
}

/// Joystick axis on the IR remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IrAxis {
    /// Left stick horizontal.
    JoyLeftX,
    /// Left stick vertical.
    JoyLeftY,
    /// Right stick horizontal.
    JoyRightX,
    /// Right stick vertical.
    JoyRightY,
}
