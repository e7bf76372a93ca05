// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use ash::vk;
use lumen_render::{Mesh, RenderSize};
use lumen_render_vk::{
    chain::{ChainFactory, Recreate, SwapchainGeneration, SwapchainManager},
    commands::{
        record_draw,
        recording::{Recorded, RecordingSink},
        DrawPlan,
    },
};

/// Stand-in for a swapchain generation: one recorded sink per image.
struct RecordedChain {
    sinks: Vec<RecordingSink>,
}

impl SwapchainGeneration for RecordedChain {
    fn image_count(&self) -> usize {
        self.sinks.len()
    }
}

struct Recorder {
    index_count: u32,
    image_count: usize,
    idles: usize,
}

impl ChainFactory for Recorder {
    type Chain = RecordedChain;

    fn wait_idle(&mut self) -> Result<()> {
        self.idles += 1;
        Ok(())
    }

    fn surface_extent(&mut self, framebuffer: RenderSize) -> Result<RenderSize> {
        Ok(framebuffer)
    }

    fn build(&mut self, framebuffer: RenderSize) -> Result<RecordedChain> {
        let extent = vk::Extent2D {
            width: framebuffer.width,
            height: framebuffer.height,
        };
        let plan = DrawPlan::new(extent, self.index_count);
        let sinks = (0..self.image_count)
            .map(|_| {
                let mut sink = RecordingSink::default();
                record_draw(&mut sink, &plan)?;
                Ok(sink)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(RecordedChain { sinks })
    }
}

fn recorder(image_count: usize) -> Recorder {
    Recorder {
        index_count: Mesh::stacked_quads().index_count(),
        image_count,
        idles: 0,
    }
}

#[test]
fn index_count_survives_repeated_recreation() {
    let mut factory = recorder(3);
    let mut manager = SwapchainManager::create(&mut factory, RenderSize::new(800, 600)).unwrap();

    for i in 1..=10u32 {
        manager.request_resize(RenderSize::new(800 + i * 16, 600 - i * 8));
        let outcome = manager.recreate(&mut factory, "resize").unwrap();
        assert_eq!(outcome, Recreate::Rebuilt { image_count: 3 });

        let chain = manager.current().unwrap();
        assert_eq!(chain.sinks.len(), 3);
        for sink in &chain.sinks {
            assert_eq!(sink.draw_counts(), vec![12]);
        }
    }
    assert_eq!(manager.rebuilds(), 10);
    assert_eq!(factory.idles, 10);
}

#[test]
fn recorded_frames_use_the_new_extent_and_inverted_depth() {
    let mut factory = recorder(2);
    let mut manager = SwapchainManager::create(&mut factory, RenderSize::new(640, 480)).unwrap();
    manager.request_resize(RenderSize::new(1024, 768));
    manager.recreate(&mut factory, "resize").unwrap();

    let calls = &manager.current().unwrap().sinks[0].calls;
    assert!(calls.contains(&Recorded::BeginRenderPass {
        extent: (1024, 768),
        clear_depth: 1.0,
    }));
    assert!(calls.contains(&Recorded::Viewport {
        min_depth: 1.0,
        max_depth: 0.0,
        width: 1024.0,
        height: 768.0,
    }));
    assert_eq!(calls.first(), Some(&Recorded::Begin));
    assert_eq!(calls.last(), Some(&Recorded::End));
}

#[test]
fn minimize_keeps_old_generation_until_restored() {
    let mut factory = recorder(2);
    let mut manager = SwapchainManager::create(&mut factory, RenderSize::new(640, 480)).unwrap();

    manager.request_resize(RenderSize::new(0, 0));
    assert_eq!(manager.recreate(&mut factory, "resize").unwrap(), Recreate::Deferred);
    assert!(manager.is_pending());
    assert_eq!(factory.idles, 0);
    assert!(manager.current().is_some());

    manager.request_resize(RenderSize::new(640, 480));
    assert_eq!(
        manager.recreate(&mut factory, "resize").unwrap(),
        Recreate::Rebuilt { image_count: 2 }
    );
    assert!(!manager.is_pending());
}
