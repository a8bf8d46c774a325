//! Flat constant storage shared by every uniform of an effect.
//!
//! Values are kept as 32-bit words so the buffer can be handed to the device
//! as float4 registers without copying. Each scalar type knows how to encode
//! itself into, and decode itself from, a slot of a given declared base type.

use bytemuck::cast_slice;

/// Bytes per float4 constant register.
pub const REGISTER_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseType {
    Bool,
    Int,
    Uint,
    Float,
}

/// Where a uniform lives inside [`ConstantStorage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformLayout {
    pub base: BaseType,
    /// Byte offset into the storage.
    pub offset: usize,
    /// Byte size of the slot.
    pub size: usize,
}

impl UniformLayout {
    /// Number of 32-bit scalars the slot holds.
    pub fn scalars(&self) -> usize {
        self.size / 4
    }
}

/// A scalar that can be written to or read from a uniform slot.
pub trait UniformValue: Copy + Default {
    fn encode(self, base: BaseType) -> u32;
    fn decode(word: u32, base: BaseType) -> Self;
}

const TRUE_WORD: u32 = u32::MAX;

fn bool_word(value: bool) -> u32 {
    if value {
        TRUE_WORD
    } else {
        0
    }
}

impl UniformValue for bool {
    fn encode(self, base: BaseType) -> u32 {
        match base {
            BaseType::Float => (if self { 1.0f32 } else { 0.0 }).to_bits(),
            BaseType::Bool | BaseType::Int | BaseType::Uint => bool_word(self),
        }
    }

    fn decode(word: u32, _base: BaseType) -> Self {
        word != 0
    }
}

impl UniformValue for i32 {
    fn encode(self, base: BaseType) -> u32 {
        match base {
            BaseType::Bool => bool_word(self != 0),
            BaseType::Int | BaseType::Uint => self as u32,
            BaseType::Float => (self as f32).to_bits(),
        }
    }

    fn decode(word: u32, base: BaseType) -> Self {
        match base {
            BaseType::Bool | BaseType::Int | BaseType::Uint => word as i32,
            BaseType::Float => f32::from_bits(word) as i32,
        }
    }
}

impl UniformValue for u32 {
    fn encode(self, base: BaseType) -> u32 {
        match base {
            BaseType::Bool => bool_word(self != 0),
            BaseType::Int | BaseType::Uint => self,
            BaseType::Float => (self as f32).to_bits(),
        }
    }

    fn decode(word: u32, base: BaseType) -> Self {
        match base {
            BaseType::Bool | BaseType::Int | BaseType::Uint => word,
            BaseType::Float => f32::from_bits(word) as u32,
        }
    }
}

impl UniformValue for f32 {
    fn encode(self, base: BaseType) -> u32 {
        match base {
            BaseType::Bool => bool_word(self != 0.0),
            BaseType::Int => (self as i32) as u32,
            BaseType::Uint => self as u32,
            BaseType::Float => self.to_bits(),
        }
    }

    fn decode(word: u32, base: BaseType) -> Self {
        match base {
            BaseType::Bool => {
                if word != 0 {
                    1.0
                } else {
                    0.0
                }
            }
            BaseType::Int => word as i32 as f32,
            BaseType::Uint => word as f32,
            BaseType::Float => f32::from_bits(word),
        }
    }
}

/// Backing buffer of all uniform values of one effect.
///
/// The size is fixed once the effect is built; slots are allocated on
/// register boundaries so a uniform never straddles two registers unless it
/// is larger than one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstantStorage {
    words: Vec<u32>,
    dirty: bool,
}

impl ConstantStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves `size` bytes at the next register boundary.
    pub fn allocate(&mut self, base: BaseType, size: usize) -> UniformLayout {
        let offset = self.words.len() * 4;
        let registers = size.div_ceil(REGISTER_SIZE).max(1);
        self.words
            .resize(self.words.len() + registers * REGISTER_SIZE / 4, 0);
        UniformLayout { base, offset, size }
    }

    pub fn byte_len(&self) -> usize {
        self.words.len() * 4
    }

    pub fn registers(&self) -> usize {
        self.byte_len() / REGISTER_SIZE
    }

    /// Storage reinterpreted as float4 register data for upload.
    pub fn as_floats(&self) -> &[f32] {
        cast_slice(&self.words)
    }

    pub fn as_bytes(&self) -> &[u8] {
        cast_slice(&self.words)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Writes `values` into a slot, coercing to the declared base type.
    ///
    /// At most `layout.size / 4` values are written. Returns `false`, leaving
    /// the storage and the dirty flag untouched, when the encoded bytes equal
    /// what is already stored.
    pub fn set<V: UniformValue>(&mut self, layout: &UniformLayout, values: &[V]) -> bool {
        let start = layout.offset / 4;
        let count = values.len().min(layout.scalars());
        let Some(slot) = self.words.get_mut(start..start + count) else {
            return false;
        };
        let mut changed = false;
        for (word, value) in slot.iter_mut().zip(values) {
            let encoded = value.encode(layout.base);
            if *word != encoded {
                *word = encoded;
                changed = true;
            }
        }
        if changed {
            self.dirty = true;
        }
        changed
    }

    /// Reads a slot into `out`, coercing from the declared base type. Returns
    /// the number of values read.
    pub fn get<V: UniformValue>(&self, layout: &UniformLayout, out: &mut [V]) -> usize {
        let start = layout.offset / 4;
        let count = out.len().min(layout.scalars());
        let Some(slot) = self.words.get(start..start + count) else {
            return 0;
        };
        for (value, word) in out.iter_mut().zip(slot) {
            *value = V::decode(*word, layout.base);
        }
        count
    }

    /// Convenience for reading a single scalar.
    pub fn get_one<V: UniformValue>(&self, layout: &UniformLayout) -> V {
        let mut value = [V::default()];
        self.get(layout, &mut value);
        value[0]
    }

    /// Copies raw bytes into a slot, used for initial values from the compiler.
    pub fn write_bytes(&mut self, layout: &UniformLayout, data: &[u8]) {
        let len = data.len().min(layout.size);
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut self.words);
        if let Some(slot) = bytes.get_mut(layout.offset..layout.offset + len) {
            slot.copy_from_slice(&data[..len]);
            self.dirty = true;
        }
    }
}
