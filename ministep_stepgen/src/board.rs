//! GPIO line table of the controller board and pin reservations.
//!
//! Lines are numbered as in the connector documentation: outputs first,
//! inputs after. Port indices follow the register window order:
//!
//! | port | bank |
//! |------|------|
//! | 0    | GPB  |
//! | 1    | GPE  |
//! | 2    | GPF  |
//! | 3    | GPG  |
//! | 4    | GPJ  |

use thiserror::Error;
use tracing::debug;

use ministep_common::device::PinMode;
use ministep_common::shm::exchange::PortPin;
use ministep_common::shm::io_helpers::bit_mask;

/// One GPIO line of the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardPin {
    pub port: u8,
    pub bit: u8,
    /// Mode the line is wired for on the connector.
    pub mode: PinMode,
    pub name: &'static str,
}

impl BoardPin {
    const fn output(port: u8, bit: u8, name: &'static str) -> Self {
        Self {
            port,
            bit,
            mode: PinMode::Output,
            name,
        }
    }

    const fn input(port: u8, bit: u8, name: &'static str) -> Self {
        Self {
            port,
            bit,
            mode: PinMode::Input,
            name,
        }
    }

    /// Port and single-bit mask of this line.
    pub const fn port_pin(&self) -> PortPin {
        PortPin::new(self.port, bit_mask(self.bit))
    }
}

/// Number of lines on the mini2440 connector.
pub const BOARD_PINS: usize = 38;

/// Lines of the mini2440 connector.
pub static MINI2440_PINS: [BoardPin; BOARD_PINS] = [
    BoardPin::output(2, 0, "GPF00"),
    BoardPin::output(2, 1, "GPF01"),
    BoardPin::output(2, 2, "GPF02"),
    BoardPin::output(2, 3, "GPF03"),
    BoardPin::output(2, 4, "GPF04"),
    BoardPin::output(2, 5, "GPF05"),
    BoardPin::output(2, 6, "GPF06"),
    BoardPin::output(3, 0, "GPG00"),
    BoardPin::output(3, 1, "GPG01"),
    BoardPin::output(3, 3, "GPG03"),
    BoardPin::output(3, 5, "GPG05"),
    BoardPin::output(3, 6, "GPG06"),
    BoardPin::output(4, 5, "GPJ05"),
    BoardPin::output(4, 4, "GPJ04"),
    BoardPin::output(4, 3, "GPJ03"),
    BoardPin::output(4, 2, "GPJ02"),
    BoardPin::output(4, 1, "GPJ01"),
    BoardPin::output(4, 0, "GPJ00"),
    BoardPin::output(0, 0, "GPB00"),
    BoardPin::input(3, 7, "GPG07"),
    BoardPin::input(3, 9, "GPG09"),
    BoardPin::input(3, 10, "GPG10"),
    BoardPin::input(3, 11, "GPG11"),
    BoardPin::input(1, 11, "GPE11"),
    BoardPin::input(1, 12, "GPE12"),
    BoardPin::input(1, 13, "GPE13"),
    BoardPin::input(3, 2, "GPG02"),
    BoardPin::input(1, 15, "GPE15"),
    BoardPin::input(1, 14, "GPE14"),
    BoardPin::input(3, 12, "GPG12"),
    BoardPin::input(4, 12, "GPJ12"),
    BoardPin::input(4, 11, "GPJ11"),
    BoardPin::input(4, 10, "GPJ10"),
    BoardPin::input(4, 9, "GPJ09"),
    BoardPin::input(4, 8, "GPJ08"),
    BoardPin::input(4, 7, "GPJ07"),
    BoardPin::input(4, 6, "GPJ06"),
    BoardPin::input(0, 1, "GPB01"),
];

/// Pin reservation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PinError {
    #[error("Pin index {0} is not on the board")]
    InvalidPin(i32),

    #[error("Pin {index} ({name}) is already configured as {mode:?}")]
    PinBusy {
        index: usize,
        name: &'static str,
        mode: PinMode,
    },

    #[error("Pin {index} ({name}) is not configured")]
    NotConfigured { index: usize, name: &'static str },
}

/// Board table plus the mode each line is currently reserved in.
#[derive(Debug)]
pub struct Board {
    pins: &'static [BoardPin; BOARD_PINS],
    in_use: heapless::Vec<Option<PinMode>, BOARD_PINS>,
}

impl Default for Board {
    fn default() -> Self {
        Self::mini2440()
    }
}

impl Board {
    pub fn mini2440() -> Self {
        Self {
            pins: &MINI2440_PINS,
            in_use: MINI2440_PINS.iter().map(|_| None).collect(),
        }
    }

    pub fn pins(&self) -> &[BoardPin] {
        self.pins
    }

    fn index(&self, index: i32) -> Result<usize, PinError> {
        usize::try_from(index)
            .ok()
            .filter(|i| *i < self.pins.len())
            .ok_or(PinError::InvalidPin(index))
    }

    /// Line at `index`.
    pub fn pin(&self, index: i32) -> Result<&BoardPin, PinError> {
        Ok(&self.pins[self.index(index)?])
    }

    /// Index of the line called `name` (case-insensitive).
    pub fn find(&self, name: &str) -> Option<usize> {
        self.pins
            .iter()
            .position(|pin| pin.name.eq_ignore_ascii_case(name))
    }

    /// Port and mask of line `index`; a negative index means "no line".
    pub fn port_pin(&self, index: i32) -> Result<PortPin, PinError> {
        if index < 0 {
            return Ok(PortPin::UNASSIGNED);
        }
        Ok(self.pin(index)?.port_pin())
    }

    /// Mode line `index` is reserved in, if any.
    pub fn mode(&self, index: i32) -> Result<Option<PinMode>, PinError> {
        Ok(self.in_use[self.index(index)?])
    }

    /// Reserve line `index` in `mode`.
    ///
    /// # Errors
    ///
    /// `InvalidPin` for an index off the board, `PinBusy` if the line is
    /// already reserved.
    pub fn configure(&mut self, index: i32, mode: PinMode) -> Result<(), PinError> {
        let i = self.index(index)?;
        let pin = &self.pins[i];
        if let Some(current) = self.in_use[i] {
            return Err(PinError::PinBusy {
                index: i,
                name: pin.name,
                mode: current,
            });
        }
        self.in_use[i] = Some(mode);
        debug!(index = i, name = pin.name, ?mode, "pin configured");
        Ok(())
    }

    /// Release line `index`.
    ///
    /// # Errors
    ///
    /// `InvalidPin` for an index off the board, `NotConfigured` if the line
    /// is free.
    pub fn release(&mut self, index: i32) -> Result<(), PinError> {
        let i = self.index(index)?;
        let pin = &self.pins[i];
        if self.in_use[i].take().is_none() {
            return Err(PinError::NotConfigured {
                index: i,
                name: pin.name,
            });
        }
        debug!(index = i, name = pin.name, "pin released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outputs_come_before_inputs() {
        let board = Board::mini2440();
        let first_input = board
            .pins()
            .iter()
            .position(|pin| pin.mode == PinMode::Input)
            .unwrap();
        assert_eq!(first_input, 19);
        assert!(board.pins()[first_input..]
            .iter()
            .all(|pin| pin.mode == PinMode::Input));
    }

    #[test]
    fn every_line_is_unique() {
        let board = Board::mini2440();
        for (i, a) in board.pins().iter().enumerate() {
            for b in &board.pins()[i + 1..] {
                assert_ne!((a.port, a.bit), (b.port, b.bit), "{} vs {}", a.name, b.name);
            }
        }
    }

    #[test]
    fn lookup_by_name_and_index() {
        let board = Board::mini2440();
        assert_eq!(board.find("gpg02"), Some(26));
        assert_eq!(board.port_pin(26), Ok(PortPin::new(3, 1 << 2)));
        assert_eq!(board.port_pin(-1), Ok(PortPin::UNASSIGNED));
        assert_eq!(board.port_pin(38), Err(PinError::InvalidPin(38)));
        assert_eq!(board.find("GPA00"), None);
    }

    #[test]
    fn configure_then_release() {
        let mut board = Board::mini2440();
        board.configure(3, PinMode::Reserved).unwrap();
        assert_eq!(board.mode(3), Ok(Some(PinMode::Reserved)));
        assert!(matches!(
            board.configure(3, PinMode::Output),
            Err(PinError::PinBusy { index: 3, .. })
        ));

        board.release(3).unwrap();
        assert_eq!(board.mode(3), Ok(None));
        assert!(matches!(
            board.release(3),
            Err(PinError::NotConfigured { index: 3, .. })
        ));
        assert_eq!(board.configure(-2, PinMode::Input), Err(PinError::InvalidPin(-2)));
    }
}
