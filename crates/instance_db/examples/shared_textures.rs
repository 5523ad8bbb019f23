// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Several render threads sharing GPU textures created from the same assets.

use std::sync::Arc;
use std::thread;

use instance_db::{
    Asset, AssetData, AssetId, AssetLoader, AssetType, AssetTypeTree, BoxError, DatabaseRegistry, InstanceDatabase, InstanceHandler,
};
use uuid::Uuid;

const IMAGE: AssetType = AssetType::from_u128(0x494d_4147);
const STREAMING_IMAGE: AssetType = AssetType::from_u128(0x5354_494d);

struct ImageAsset {
    id: AssetId,
    width: u32,
    height: u32,
}

impl AssetData for ImageAsset {
    fn asset_id(&self) -> AssetId {
        self.id
    }

    fn asset_type(&self) -> AssetType {
        STREAMING_IMAGE
    }
}

/// Pretends to read images from disk.
struct DiskLoader;

impl AssetLoader for DiskLoader {
    fn load_blocking(&self, id: AssetId, _asset_type: AssetType) -> Result<Arc<dyn AssetData>, BoxError> {
        let side = 64 << (id.guid().as_u128() % 4);
        Ok(Arc::new(ImageAsset {
            id,
            width: side,
            height: side,
        }))
    }
}

#[derive(Debug)]
struct GpuTexture {
    bytes: u64,
}

fn main() -> instance_db::Result<()> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();

    let registry = Arc::new(DatabaseRegistry::new());
    registry.create(
        InstanceDatabase::<GpuTexture>::builder(IMAGE)
            .name("gpu textures")
            .loader(Arc::new(DiskLoader))
            .hierarchy(Arc::new(AssetTypeTree::new().with_parent(STREAMING_IMAGE, IMAGE)))
            .handler(
                STREAMING_IMAGE,
                InstanceHandler::new(|asset: &Asset| {
                    let image = asset.get::<ImageAsset>()?;
                    Some(GpuTexture {
                        bytes: u64::from(image.width) * u64::from(image.height) * 4,
                    })
                })
                .with_destroy(|texture: GpuTexture| println!("freeing {} bytes of video memory", texture.bytes)),
            ),
    )?;

    // Every frame of every render thread asks for the same handful of textures.
    let assets: Vec<_> = (1..=3)
        .map(|n| Asset::pending(AssetId::new(Uuid::from_u128(n), 0), STREAMING_IMAGE))
        .collect();

    let handles: Vec<_> = (0..4)
        .map(|thread_index| {
            let registry = Arc::clone(&registry);
            let assets = assets.clone();
            thread::spawn(move || -> instance_db::Result<u64> {
                let textures = registry.get::<GpuTexture>()?;
                let mut total = 0;
                for asset in &assets {
                    let texture = textures.find_or_create_from_asset(asset)?;
                    total += texture.bytes;
                }
                println!("render thread {thread_index} uses {total} bytes of textures");
                Ok(total)
            })
        })
        .collect();

    let textures = registry.get::<GpuTexture>()?;
    let pinned = textures.find_or_create_from_asset(&assets[0])?;

    for handle in handles {
        match handle.join() {
            Ok(result) => {
                let _bytes = result?;
            }
            Err(_) => eprintln!("a render thread panicked"),
        }
    }

    println!("{} texture(s) still resident: {pinned:?}", textures.len());
    drop(pinned);

    let report = registry.destroy::<GpuTexture>()?;
    println!("database '{}' shut down cleanly: {}", report.database(), report.is_clean());

    Ok(())
}
