//! RC4 stream cipher
//!
//! Implemented in-crate because PDF derives keys of 5 to 16 bytes at run
//! time, while the ecosystem cipher crates fix the key size in the type.

pub(crate) struct Rc4 {
    state: [u8; 256],
    i: u8,
    j: u8,
}

impl Rc4 {
    /// Key must be 1-256 bytes
    pub fn new(key: &[u8]) -> Self {
        debug_assert!(!key.is_empty() && key.len() <= 256);
        let mut state: [u8; 256] = std::array::from_fn(|i| i as u8);
        let mut j: u8 = 0;
        for i in 0..256 {
            j = j.wrapping_add(state[i]).wrapping_add(key[i % key.len()]);
            state.swap(i, j as usize);
        }
        Self { state, i: 0, j: 0 }
    }

    /// Encrypt or decrypt; RC4 is symmetric
    pub fn process(&mut self, data: &[u8]) -> Vec<u8> {
        data.iter().map(|byte| byte ^ self.next_key_byte()).collect()
    }

    fn next_key_byte(&mut self) -> u8 {
        self.i = self.i.wrapping_add(1);
        self.j = self.j.wrapping_add(self.state[self.i as usize]);
        self.state.swap(self.i as usize, self.j as usize);
        let index = self.state[self.i as usize].wrapping_add(self.state[self.j as usize]);
        self.state[index as usize]
    }
}

/// One-shot convenience over [`Rc4`]
pub(crate) fn apply(key: &[u8], data: &[u8]) -> Vec<u8> {
    Rc4::new(key).process(data)
}
