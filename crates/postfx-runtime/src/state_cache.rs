//! Deduplication of immutable device state objects.
//!
//! Effects routinely declare many samplers and passes with identical
//! fixed-function state. Each [`StateCache`] keys device objects by a 32-bit
//! FNV-1a hash of the descriptor fields and compares descriptors structurally
//! within a bucket, so a hash collision never aliases two different states.
//!
//! Cached states are shared by every technique of every loaded effect. They
//! are never evicted one by one; [`StateObjects::clear`] releases all of them
//! when the whole effect set is unloaded.

use std::collections::HashMap;
use std::fmt;

use tracing::trace;

use crate::backend::{
    BlendDesc, BlendState, DepthStencilDesc, DepthStencilState, DeviceObject, DeviceResult,
    GpuDevice, SamplerDesc, SamplerState, StencilFaceDesc,
};

const FNV_OFFSET_BASIS: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

/// 32-bit FNV-1a hasher.
#[derive(Debug, Clone, Copy)]
pub struct Fnv1a32(u32);

impl Fnv1a32 {
    pub fn new() -> Self {
        Self(FNV_OFFSET_BASIS)
    }

    pub fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.0 ^= u32::from(byte);
            self.0 = self.0.wrapping_mul(FNV_PRIME);
        }
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write(&value.to_le_bytes());
    }

    pub fn finish(self) -> u32 {
        self.0
    }
}

impl Default for Fnv1a32 {
    fn default() -> Self {
        Self::new()
    }
}

/// A descriptor that can be deduplicated into a device state object.
pub trait StateDescriptor: Copy + fmt::Debug {
    /// Device handle created from the descriptor.
    type Handle: Copy + fmt::Debug;

    /// 32-bit content hash of the raw fields.
    fn content_hash(&self) -> u32;

    /// Field-by-field equality.
    fn same_state(&self, other: &Self) -> bool;

    fn create<D: GpuDevice>(&self, device: &mut D) -> DeviceResult<Self::Handle>;

    fn device_object(handle: Self::Handle) -> DeviceObject;
}

impl StateDescriptor for SamplerDesc {
    type Handle = SamplerState;

    fn content_hash(&self) -> u32 {
        let mut hasher = Fnv1a32::new();
        hasher.write_u32(self.filter.code());
        hasher.write_u32(self.address_u.code());
        hasher.write_u32(self.address_v.code());
        hasher.write_u32(self.address_w.code());
        hasher.write_u32(self.mip_lod_bias.to_bits());
        hasher.write_u32(self.max_anisotropy);
        hasher.write_u32(self.comparison as u32);
        hasher.write_u32(self.min_lod.to_bits());
        hasher.write_u32(self.max_lod.to_bits());
        hasher.finish()
    }

    // Bitwise on the float fields, so NaN LODs still deduplicate.
    fn same_state(&self, other: &Self) -> bool {
        self.filter == other.filter
            && self.address_u == other.address_u
            && self.address_v == other.address_v
            && self.address_w == other.address_w
            && self.mip_lod_bias.to_bits() == other.mip_lod_bias.to_bits()
            && self.max_anisotropy == other.max_anisotropy
            && self.comparison == other.comparison
            && self.min_lod.to_bits() == other.min_lod.to_bits()
            && self.max_lod.to_bits() == other.max_lod.to_bits()
    }

    fn create<D: GpuDevice>(&self, device: &mut D) -> DeviceResult<SamplerState> {
        device.create_sampler(self)
    }

    fn device_object(handle: SamplerState) -> DeviceObject {
        DeviceObject::Sampler(handle)
    }
}

impl StateDescriptor for BlendDesc {
    type Handle = BlendState;

    fn content_hash(&self) -> u32 {
        let mut hasher = Fnv1a32::new();
        for (&enable, &mask) in self.blend_enable.iter().zip(&self.render_target_write_mask) {
            hasher.write(&[u8::from(enable), mask]);
        }
        hasher.write(&[
            self.src_blend as u8,
            self.dest_blend as u8,
            self.blend_op as u8,
            self.src_blend_alpha as u8,
            self.dest_blend_alpha as u8,
            self.blend_op_alpha as u8,
        ]);
        hasher.finish()
    }

    fn same_state(&self, other: &Self) -> bool {
        self == other
    }

    fn create<D: GpuDevice>(&self, device: &mut D) -> DeviceResult<BlendState> {
        device.create_blend_state(self)
    }

    fn device_object(handle: BlendState) -> DeviceObject {
        DeviceObject::BlendState(handle)
    }
}

fn write_face(hasher: &mut Fnv1a32, face: &StencilFaceDesc) {
    hasher.write(&[
        face.fail_op as u8,
        face.depth_fail_op as u8,
        face.pass_op as u8,
        face.func as u8,
    ]);
}

impl StateDescriptor for DepthStencilDesc {
    type Handle = DepthStencilState;

    fn content_hash(&self) -> u32 {
        let mut hasher = Fnv1a32::new();
        hasher.write(&[
            u8::from(self.depth_enable),
            u8::from(self.depth_write),
            self.depth_func as u8,
            u8::from(self.stencil_enable),
            self.stencil_read_mask,
            self.stencil_write_mask,
        ]);
        write_face(&mut hasher, &self.front_face);
        write_face(&mut hasher, &self.back_face);
        hasher.finish()
    }

    fn same_state(&self, other: &Self) -> bool {
        self == other
    }

    fn create<D: GpuDevice>(&self, device: &mut D) -> DeviceResult<DepthStencilState> {
        device.create_depth_stencil_state(self)
    }

    fn device_object(handle: DepthStencilState) -> DeviceObject {
        DeviceObject::DepthStencilState(handle)
    }
}

/// Content-hash keyed store of one kind of state object.
#[derive(Debug)]
pub struct StateCache<K: StateDescriptor> {
    buckets: HashMap<u32, Vec<(K, K::Handle)>>,
    hits: u64,
    misses: u64,
}

impl<K: StateDescriptor> StateCache<K> {
    pub fn new() -> Self {
        Self {
            buckets: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    /// Returns the cached state for `desc`, creating it on first use.
    ///
    /// Failed creations are not cached.
    pub fn get_or_create<D: GpuDevice>(&mut self, device: &mut D, desc: &K) -> DeviceResult<K::Handle> {
        let hash = desc.content_hash();
        let bucket = self.buckets.entry(hash).or_default();

        if let Some((_, handle)) = bucket.iter().find(|(cached, _)| cached.same_state(desc)) {
            self.hits += 1;
            return Ok(*handle);
        }

        let handle = desc.create(device)?;
        self.misses += 1;
        trace!(hash, "state object created");
        bucket.push((*desc, handle));
        Ok(handle)
    }

    /// Number of distinct cached states.
    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Releases every cached state.
    pub fn clear<D: GpuDevice>(&mut self, device: &mut D) {
        for (_, bucket) in self.buckets.drain() {
            for (_, handle) in bucket {
                device.release(K::device_object(handle));
            }
        }
        self.hits = 0;
        self.misses = 0;
    }
}

impl<K: StateDescriptor> Default for StateCache<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// All state caches of an effect set.
#[derive(Debug, Default)]
pub struct StateObjects {
    pub samplers: StateCache<SamplerDesc>,
    pub blend_states: StateCache<BlendDesc>,
    pub depth_stencil_states: StateCache<DepthStencilDesc>,
}

impl StateObjects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.samplers.len() + self.blend_states.len() + self.depth_stencil_states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear<D: GpuDevice>(&mut self, device: &mut D) {
        self.samplers.clear(device);
        self.blend_states.clear(device);
        self.depth_stencil_states.clear(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ObjectKind, SoftwareDevice};
    use postfx_core::{AddressMode, BlendFactor, BlendOp, FilterMode};

    fn opaque() -> BlendDesc {
        BlendDesc {
            blend_enable: [false; 8],
            src_blend: BlendFactor::One,
            dest_blend: BlendFactor::Zero,
            blend_op: BlendOp::Add,
            src_blend_alpha: BlendFactor::One,
            dest_blend_alpha: BlendFactor::Zero,
            blend_op_alpha: BlendOp::Add,
            render_target_write_mask: [0xF; 8],
        }
    }

    #[test]
    fn fnv_reference_vectors() {
        assert_eq!(Fnv1a32::new().finish(), 0x811c_9dc5);
        let mut h = Fnv1a32::new();
        h.write(b"a");
        assert_eq!(h.finish(), 0xe40c_292c);
    }

    #[test]
    fn equal_descriptors_share_one_state() {
        let mut device = SoftwareDevice::new();
        let mut cache = StateCache::<SamplerDesc>::new();
        let desc = SamplerDesc::default();

        let a = cache.get_or_create(&mut device, &desc).unwrap();
        let b = cache.get_or_create(&mut device, &desc).unwrap();
        assert_eq!(a, b);
        assert_eq!(cache.len(), 1);
        assert_eq!((cache.hits(), cache.misses()), (1, 1));
        assert_eq!(device.live_objects(), 1);
    }

    #[test]
    fn differing_descriptors_get_distinct_states() {
        let mut device = SoftwareDevice::new();
        let mut cache = StateCache::<SamplerDesc>::new();
        let linear = SamplerDesc {
            filter: FilterMode::MinMagMipLinear,
            ..Default::default()
        };
        let wrap = SamplerDesc {
            address_u: AddressMode::Wrap,
            ..linear
        };

        let a = cache.get_or_create(&mut device, &linear).unwrap();
        let b = cache.get_or_create(&mut device, &wrap).unwrap();
        assert_ne!(a, b);
        assert_ne!(linear.content_hash(), wrap.content_hash());

        cache.clear(&mut device);
        assert!(cache.is_empty());
        assert_eq!(device.live_objects(), 0);
    }

    /// Sampler descriptor whose hash always collides.
    #[derive(Debug, Clone, Copy)]
    struct Colliding(SamplerDesc);

    impl StateDescriptor for Colliding {
        type Handle = SamplerState;

        fn content_hash(&self) -> u32 {
            7
        }

        fn same_state(&self, other: &Self) -> bool {
            self.0.same_state(&other.0)
        }

        fn create<D: GpuDevice>(&self, device: &mut D) -> DeviceResult<SamplerState> {
            self.0.create(device)
        }

        fn device_object(handle: SamplerState) -> DeviceObject {
            SamplerDesc::device_object(handle)
        }
    }

    #[test]
    fn hash_collision_compares_fields() {
        let mut device = SoftwareDevice::new();
        let mut cache = StateCache::<Colliding>::new();
        let point = Colliding(SamplerDesc::default());
        let linear = Colliding(SamplerDesc {
            filter: FilterMode::MinMagMipLinear,
            ..Default::default()
        });
        assert_eq!(point.content_hash(), linear.content_hash());

        let a = cache.get_or_create(&mut device, &point).unwrap();
        let b = cache.get_or_create(&mut device, &linear).unwrap();
        let c = cache.get_or_create(&mut device, &point).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, c);
        assert_eq!(cache.len(), 2);
        assert_eq!((cache.hits(), cache.misses()), (1, 2));
        assert_eq!(device.sampler_desc(b).unwrap().filter, FilterMode::MinMagMipLinear);

        cache.clear(&mut device);
        assert_eq!(device.live_objects(), 0);
    }

    #[test]
    fn blend_write_mask_is_part_of_the_key() {
        let mut device = SoftwareDevice::new();
        let mut states = StateObjects::new();
        let masked = BlendDesc {
            render_target_write_mask: [0x7; 8],
            ..opaque()
        };

        let a = states.blend_states.get_or_create(&mut device, &opaque()).unwrap();
        let b = states.blend_states.get_or_create(&mut device, &masked).unwrap();
        let c = states.blend_states.get_or_create(&mut device, &opaque()).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, c);

        states.clear(&mut device);
        assert!(states.is_empty());
        assert_eq!(device.live_objects(), 0);
    }

    #[test]
    fn failed_creation_is_not_cached() {
        let mut device = SoftwareDevice::new();
        device.fail_next(ObjectKind::Sampler);
        let mut cache = StateCache::<SamplerDesc>::new();
        assert!(cache.get_or_create(&mut device, &SamplerDesc::default()).is_err());
        assert!(cache.is_empty());
        assert!(cache.get_or_create(&mut device, &SamplerDesc::default()).is_ok());
    }
}
