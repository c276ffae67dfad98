//! Selection scenarios spanning picking, classification, the store, and
//! the perceptual color utilities.

use matshift::color;
use matshift::parts::{PartCategory, PartMap};
use matshift::picking::{Selection, SelectionController};
use matshift::store::MaterialStore;

use crate::common::test_utils::{mesh, scene_with_names};

mod common;

#[test]
fn lace_part_flat_color_reads_back_mid_lightness() {
    let scene = scene_with_names(&["LaceKnot_03", "Sole"], 1);
    let parts = PartMap::default();
    let mut controller = SelectionController::new();
    let mut store = MaterialStore::new();

    controller.click(&scene, Some(mesh(0)), &parts);
    let part = match &controller.selection {
        Selection::Selected(part) => part.clone(),
        Selection::Idle => panic!("lace knot should be selectable"),
    };
    assert_eq!(part.category, PartCategory::Lace);

    let mid_gray = 0x777777;
    store.update(part.mesh, |config| config.flat_color = Some(mid_gray));

    let packed = store.get(part.mesh).unwrap().flat_color.unwrap();
    let lab = color::packed_to_lab(packed);
    assert!((lab.l - 50.0).abs() < 2.0, "expected mid lightness, got {}", lab.l);
}

#[test]
fn clicking_a_plain_mesh_selects_nothing_and_writes_nothing() {
    let scene = scene_with_names(&["Shape027", "Sole"], 1);
    let parts = PartMap::default();
    let mut controller = SelectionController::new();
    let store = MaterialStore::new();

    controller.click(&scene, Some(mesh(1)), &parts);

    assert_eq!(controller.selection, Selection::Idle);
    assert!(store.is_empty());
    assert_eq!(store.revision(), 0);
}

#[test]
fn background_click_clears_an_existing_selection() {
    let scene = scene_with_names(&["Shape026"], 1);
    let parts = PartMap::default();
    let mut controller = SelectionController::new();

    controller.click(&scene, Some(mesh(0)), &parts);
    assert!(matches!(controller.selection, Selection::Selected(_)));

    controller.click(&scene, None, &parts);
    assert_eq!(controller.selection, Selection::Idle);
}

#[test]
fn substring_classification_drives_selectability() {
    let scene = scene_with_names(&["xxShape027yy", "Line040_tag", "Other"], 1);
    let parts = PartMap::default();
    let mut controller = SelectionController::new();

    assert!(controller.click(&scene, Some(mesh(0)), &parts).is_some());
    assert!(controller.click(&scene, Some(mesh(1)), &parts).is_some());
    match &controller.selection {
        Selection::Selected(part) => assert_eq!(part.category, PartCategory::Label),
        Selection::Idle => panic!("label should be selectable"),
    }
    assert!(controller.click(&scene, Some(mesh(2)), &parts).is_none());
}
