use tilescope::{
    prelude::*,
    rendering::decode::RawRgbaDecoder,
};

const TILE_SIZE: u32 = 64;
const MAX_LEVEL: u8 = 4;

/// Build an in-memory tile pack where every tile is a flat color.
fn build_pack() -> anyhow::Result<PackHandle> {
    let mut builder = TilePackBuilder::new(TILE_SIZE);
    for level in 0..=MAX_LEVEL {
        let n = 1u32 << level;
        for y in 0..n {
            for x in 0..n {
                let shade = (40 * level as u32 + 8 * (x + y)) as u8;
                let bitmap = Bitmap::solid(TILE_SIZE, TILE_SIZE, [shade, shade, 255 - shade, 255]);
                builder.add(TileKey::new(level, x, y), RawRgbaDecoder::encode(&bitmap))?;
            }
        }
    }
    Ok(PackHandle::from_bytes(builder.build()?)?)
}

/// Drive the tile engine without any window or GPU
fn main() -> anyhow::Result<()> {
    tilescope::init_logging();

    println!("🧱 Tilescope Headless Example");
    println!("=============================");

    let pack = build_pack()?;
    println!("✅ Packed {} tiles", pack.pack()?.len());

    let spawner = ManualSpawner::new();
    let clock = Arc::new(ManualClock::new(0.0));
    let grid = PyramidGrid::square(TILE_SIZE, 0, MAX_LEVEL);
    let mut engine = TileEngine::builder()
        .with_profile(SchedulerProfile::Balanced)
        .with_decoder(Arc::new(RawRgbaDecoder))
        .with_spawner(Arc::new(spawner.clone()))
        .with_clock(clock.clone())
        .build(TileSource::pack(pack), grid)?;

    let world = (TILE_SIZE << MAX_LEVEL) as f64;
    let view = ViewState::new(1.0, Point::new(world / 2.0, world / 2.0), 320.0, 240.0)
        .with_pyramid(TILE_SIZE, MAX_LEVEL);

    println!("\n🎬 Settling at zoom {}:", view.zoom);
    for _ in 0..3 {
        let out = engine.tick(&view);
        let decoded = spawner.run_until_stalled();
        println!(
            "   frame {} - {} draws, {} requested, {} decoded, coverage {:?}",
            out.frame,
            out.draws().len(),
            out.requested,
            decoded,
            out.plan.coverage_of(out.plan.base_level)
        );
        clock.advance(16.0);
    }

    println!("\n🔍 Animating to zoom 3.5:");
    engine.animate_to(3.5, Point::new(world / 3.0, world / 3.0), 250.0);
    while engine.is_animating() {
        clock.advance(16.0);
        let out = engine.tick(&view);
        spawner.run_until_stalled();
        println!(
            "   frame {} - zoom {:.2}, base {}, levels {:?}, moving {}",
            out.frame,
            out.view.zoom,
            out.plan.base_level,
            out.draws().levels(),
            out.moving
        );
    }

    let settled = engine.view().clone();
    for _ in 0..3 {
        clock.advance(100.0);
        engine.tick(&settled);
        spawner.run_until_stalled();
    }

    println!("\n📊 Engine stats:");
    println!("{}", serde_json::to_string_pretty(&engine.stats())?);

    println!("\n✅ Headless example completed");
    Ok(())
}
