//! End-to-end reconciliation behavior: store edits flowing into scene
//! materials, async texture binding under reordering, and restore on
//! config removal.

use matshift::parts::PartMap;
use matshift::store::MaterialStore;
use matshift::sync::SceneSync;

use crate::common::test_utils::{ScriptedFetcher, mesh, scene_with_names};

mod common;

#[test]
fn untouched_meshes_keep_their_authored_material() {
    let mut scene = scene_with_names(&["Shape027", "Sole"], 1);
    let store = MaterialStore::new();
    let parts = PartMap::default();
    let mut sync = SceneSync::new();
    let mut fetcher = ScriptedFetcher::new();

    sync.reconcile(&mut scene, &store, &parts, &mut fetcher);

    for id in [mesh(0), mesh(1)] {
        let material = scene.material_of(id).unwrap();
        assert_eq!(material.base_color, [0.25, 0.5, 0.75]);
        assert_eq!(material.roughness, 0.6);
        assert!(material.map.is_none());
    }
    assert!(fetcher.requests.is_empty());
}

#[test]
fn flat_color_edit_only_touches_the_private_clone() {
    let mut scene = scene_with_names(&["Shape027", "Sole"], 1);
    let mut store = MaterialStore::new();
    let parts = PartMap::default();
    let mut sync = SceneSync::new();
    let mut fetcher = ScriptedFetcher::new();

    store.update(mesh(0), |config| config.flat_color = Some(0xff0000));
    sync.reconcile(&mut scene, &store, &parts, &mut fetcher);

    let vamp = scene.material_of(mesh(0)).unwrap();
    assert!(vamp.base_color[0] > 0.9);
    assert!(vamp.base_color[1] < 0.1);
    // The shared authored material is untouched.
    let sole = scene.material_of(mesh(1)).unwrap();
    assert_eq!(sole.base_color, [0.25, 0.5, 0.75]);
}

#[test]
fn texture_binds_after_fetch_and_survives_slider_ticks() {
    let mut scene = scene_with_names(&["Shape027"], 1);
    let mut store = MaterialStore::new();
    let parts = PartMap::default();
    let mut sync = SceneSync::new();
    let mut fetcher = ScriptedFetcher::new();

    store.apply_texture(mesh(0), "assets/textures/denim.jpg");
    sync.reconcile(&mut scene, &store, &parts, &mut fetcher);
    assert_eq!(fetcher.requests.len(), 1);
    // Nothing bound until the fetch completes.
    assert!(scene.material_of(mesh(0)).unwrap().map.is_none());

    sync.poll_completions(&mut scene, &store, vec![fetcher.succeed(0)]);
    let bound = scene.material_of(mesh(0)).unwrap().map.clone().unwrap();
    assert_eq!(bound.url, "assets/textures/denim.jpg");
    assert_eq!(bound.repeat, [1.0, 1.0]);

    store.update(mesh(0), |config| {
        config.scale = 2.5;
        config.offset_x = 0.2;
        config.rotation_deg = 45.0;
    });
    sync.reconcile(&mut scene, &store, &parts, &mut fetcher);

    // Parameter refresh in place, no second fetch.
    assert_eq!(fetcher.requests.len(), 1);
    let map = scene.material_of(mesh(0)).unwrap().map.clone().unwrap();
    assert_eq!(map.repeat, [2.5, 2.5]);
    assert_eq!(map.offset, [0.2, 0.0]);
    assert!((map.rotation - std::f32::consts::FRAC_PI_4).abs() < 1e-6);
}

#[test]
fn out_of_order_completions_resolve_to_the_latest_url() {
    let mut scene = scene_with_names(&["Shape027"], 1);
    let mut store = MaterialStore::new();
    let parts = PartMap::default();
    let mut sync = SceneSync::new();
    let mut fetcher = ScriptedFetcher::new();

    store.apply_texture(mesh(0), "a.png");
    sync.reconcile(&mut scene, &store, &parts, &mut fetcher);
    store.apply_texture(mesh(0), "b.png");
    sync.reconcile(&mut scene, &store, &parts, &mut fetcher);

    let stale = fetcher.succeed(0);
    let fresh = fetcher.succeed(1);
    sync.poll_completions(&mut scene, &store, vec![fresh, stale]);

    let map = scene.material_of(mesh(0)).unwrap().map.clone().unwrap();
    assert_eq!(map.url, "b.png");
}

#[test]
fn opaque_config_without_url_clears_the_surface_map() {
    let mut scene = scene_with_names(&["Shape027"], 1);
    let mut store = MaterialStore::new();
    let parts = PartMap::default();
    let mut sync = SceneSync::new();
    let mut fetcher = ScriptedFetcher::new();

    store.apply_texture(mesh(0), "a.png");
    sync.reconcile(&mut scene, &store, &parts, &mut fetcher);
    sync.poll_completions(&mut scene, &store, vec![fetcher.succeed(0)]);
    assert!(scene.material_of(mesh(0)).unwrap().map.is_some());

    store.update(mesh(0), |config| {
        config.texture_url = None;
        config.opacity = 1.0;
    });
    sync.reconcile(&mut scene, &store, &parts, &mut fetcher);

    let material = scene.material_of(mesh(0)).unwrap();
    assert!(material.map.is_none());
    assert_eq!(material.opacity, 1.0);
}

#[test]
fn failed_fetch_is_a_no_op_for_the_material() {
    let mut scene = scene_with_names(&["Shape027"], 1);
    let mut store = MaterialStore::new();
    let parts = PartMap::default();
    let mut sync = SceneSync::new();
    let mut fetcher = ScriptedFetcher::new();

    store.apply_texture(mesh(0), "broken.png");
    sync.reconcile(&mut scene, &store, &parts, &mut fetcher);
    sync.poll_completions(&mut scene, &store, vec![fetcher.fail(0)]);

    assert!(scene.material_of(mesh(0)).unwrap().map.is_none());
}

#[test]
fn reload_resets_bindings_and_reapplies_the_store() {
    let mut scene = scene_with_names(&["Shape027"], 1);
    let mut store = MaterialStore::new();
    let parts = PartMap::default();
    let mut sync = SceneSync::new();
    let mut fetcher = ScriptedFetcher::new();

    store.apply_texture(mesh(0), "a.png");
    sync.reconcile(&mut scene, &store, &parts, &mut fetcher);
    sync.poll_completions(&mut scene, &store, vec![fetcher.succeed(0)]);

    // The asset reload path clears the store alongside the scene swap.
    let mut reloaded = scene_with_names(&["Shape027"], 2);
    store.reset();
    assert!(sync.needs_reconcile(&reloaded, &store));
    sync.reconcile(&mut reloaded, &store, &parts, &mut fetcher);

    let material = reloaded.material_of(mesh(0)).unwrap();
    assert!(material.map.is_none());
    assert_eq!(material.base_color, [0.25, 0.5, 0.75]);
    // No new fetches were issued for the cleared store.
    assert_eq!(fetcher.requests.len(), 1);
}
