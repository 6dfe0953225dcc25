/// A big-endian `u16`, as it appears on the wire.
#[derive(Clone, Copy, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(transparent)]
pub(crate) struct U16(u16);

impl U16 {
    pub(crate) fn get(self) -> u16 {
        u16::from_be(self.0)
    }
}

impl From<u16> for U16 {
    fn from(value: u16) -> Self {
        Self(value.to_be())
    }
}
