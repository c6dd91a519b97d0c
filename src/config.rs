use serde::Deserialize;

#[derive(Deserialize, Debug, Copy, Clone)]
pub struct Limits {
    pub frame_reserved: u32,
    pub hidden_slot_size: u32,
    pub size_jump_always: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Limits { frame_reserved: 3, hidden_slot_size: 1, size_jump_always: 2 }
    }
}
