// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Test fixtures: a pair of asset types, a counting database, a scripted loader and log capture.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use hashbrown::HashMap;
use tracing_subscriber::fmt::MakeWriter;
use uuid::Uuid;

use crate::{Asset, AssetData, AssetId, AssetLoader, AssetType, BoxError, InstanceDatabase, InstanceDatabaseBuilder, InstanceHandler};

pub(crate) const TEXTURE: AssetType = AssetType::from_u128(0x7e47_0000);
pub(crate) const MESH: AssetType = AssetType::from_u128(0x3e54_0000);

pub(crate) fn asset_id(n: u32) -> AssetId {
    AssetId::new(Uuid::from_u128(0xa55e_7000_0000 + u128::from(n)), 0)
}

/// A texture asset whose instances are simply its value.
#[derive(Debug)]
pub(crate) struct TestTexture {
    pub id: AssetId,
    pub value: u32,
}

impl AssetData for TestTexture {
    fn asset_id(&self) -> AssetId {
        self.id
    }

    fn asset_type(&self) -> AssetType {
        TEXTURE
    }
}

#[derive(Debug)]
pub(crate) struct TestMesh;

impl AssetData for TestMesh {
    fn asset_id(&self) -> AssetId {
        asset_id(1000)
    }

    fn asset_type(&self) -> AssetType {
        MESH
    }
}

/// A loaded texture asset with id `asset_id(value)`.
pub(crate) fn texture(value: u32) -> Asset {
    texture_with_id(asset_id(value), value)
}

pub(crate) fn texture_with_id(id: AssetId, value: u32) -> Asset {
    Asset::ready(Arc::new(TestTexture { id, value }))
}

pub(crate) fn mesh() -> Asset {
    Asset::ready(Arc::new(TestMesh))
}

/// Builds databases of `u32` over [`TEXTURE`] that count creations and destructions.
#[derive(Debug, Default)]
pub(crate) struct Fixture {
    pub created: Arc<AtomicUsize>,
    pub destroyed: Arc<AtomicUsize>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handler(&self) -> InstanceHandler<u32> {
        let created = Arc::clone(&self.created);
        let destroyed = Arc::clone(&self.destroyed);

        InstanceHandler::new(move |asset: &Asset| {
            let texture = asset.get::<TestTexture>()?;
            created.fetch_add(1, Ordering::SeqCst);
            Some(texture.value)
        })
        .with_destroy(move |_| {
            destroyed.fetch_add(1, Ordering::SeqCst);
        })
    }

    pub fn builder(&self) -> InstanceDatabaseBuilder<u32> {
        InstanceDatabase::builder(TEXTURE).name("textures").handler(TEXTURE, self.handler())
    }

    pub fn database(&self) -> InstanceDatabase<u32> {
        self.builder().build().unwrap()
    }
}

/// An [`AssetLoader`] serving payloads from a map and counting the loads it performs.
#[derive(Default)]
pub(crate) struct MapLoader {
    assets: Mutex<HashMap<AssetId, Arc<dyn AssetData>>>,
    pub loads: AtomicUsize,
}

impl MapLoader {
    pub fn insert(&self, data: Arc<dyn AssetData>) {
        self.assets.lock().unwrap().insert(data.asset_id(), data);
    }
}

impl AssetLoader for MapLoader {
    fn load_blocking(&self, id: AssetId, _asset_type: AssetType) -> Result<Arc<dyn AssetData>, BoxError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.assets
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| format!("asset {id} is missing").into())
    }
}

/// Captures formatted log output for the current thread.
///
/// Install with `tracing::subscriber::set_default(capture.subscriber())`.
#[derive(Debug, Clone, Default)]
pub(crate) struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock().unwrap()).to_string()
    }

    pub fn assert_contains(&self, expected: &str) {
        let output = self.output();
        assert!(output.contains(expected), "log output does not contain '{expected}', got:\n{output}");
    }

    pub fn assert_not_contains(&self, unexpected: &str) {
        let output = self.output();
        assert!(!output.contains(unexpected), "log output unexpectedly contains '{unexpected}', got:\n{output}");
    }

    pub fn subscriber(&self) -> impl tracing::Subscriber {
        use tracing_subscriber::layer::SubscriberExt;
        tracing_subscriber::registry().with(tracing_subscriber::fmt::layer().with_writer(self.clone()).with_ansi(false))
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogCaptureWriter {
            buffer: Arc::clone(&self.buffer),
        }
    }
}

pub(crate) struct LogCaptureWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl Write for LogCaptureWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
