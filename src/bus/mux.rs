use embedded_hal::digital::{OutputPin, PinState};

use super::Device;

/// Routes the shared line to one device.
pub trait DeviceSelect {
    type Error;

    fn select(&mut self, device: Device) -> Result<(), Self::Error>;
}

/// A 4051-style analog mux driven by three address pins.
pub struct Mux<A0, A1, A2> {
    a0: A0,
    a1: A1,
    a2: A2,
}

impl<A0, A1, A2> Mux<A0, A1, A2> {
    pub const fn new(a0: A0, a1: A1, a2: A2) -> Self {
        Self { a0, a1, a2 }
    }

    pub fn release(self) -> (A0, A1, A2) {
        (self.a0, self.a1, self.a2)
    }
}

impl<A0, A1, A2, E> DeviceSelect for Mux<A0, A1, A2>
where
    A0: OutputPin<Error = E>,
    A1: OutputPin<Error = E>,
    A2: OutputPin<Error = E>,
{
    type Error = E;

    fn select(&mut self, device: Device) -> Result<(), E> {
        let channel = device.mux_channel();
        self.a0.set_state(PinState::from(channel & 0b001 != 0))?;
        self.a1.set_state(PinState::from(channel & 0b010 != 0))?;
        self.a2.set_state(PinState::from(channel & 0b100 != 0))
    }
}
