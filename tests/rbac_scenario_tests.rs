//! Spatial permission scenarios: proximity reach with default
//! permissions, and the read-left-write-right zone split.

use ainulindale::board::{BoardModel, Entity, ToolEntity};
use ainulindale::rbac::{Permission, RbacConfig, RbacEngine, ZoneConfig};

#[test]
fn test_neighbor_reach_with_range_one() {
    let mut board = BoardModel::new("s1", "S1", 3);
    let tool = ToolEntity::new("fs", "Files", "filesystem")
        .with_range(1)
        .with_rbac(
            RbacConfig::enabled()
                .with_default_permissions([Permission::Read, Permission::Execute]),
        );
    board.place_entity("1,0", Entity::Tool(tool)).unwrap();

    // The adjacent agent reads.
    let near = RbacEngine::check_permission(&board, "0,0", "fs", Permission::Read);
    assert!(near.allowed, "{}", near.reason);

    // An agent two steps out is refused with the range diagnostic.
    let far = RbacEngine::check_permission(&board, "3,0", "fs", Permission::Read);
    assert!(!far.allowed);
    assert_eq!(far.reason, "Not within range (distance: 2, range: 1)");

    // Default permissions bound what proximity grants.
    let write = RbacEngine::check_permission(&board, "0,0", "fs", Permission::Write);
    assert!(!write.allowed);
    let execute = RbacEngine::check_permission(&board, "0,0", "fs", Permission::Execute);
    assert!(execute.allowed);
}

#[test]
fn test_zone_split_read_left_write_right() {
    let mut board = BoardModel::new("s2", "S2", 3);
    let tool = ToolEntity::new("fs", "Files", "filesystem")
        .with_range(1)
        .with_rbac(RbacConfig::enabled().with_zones(ZoneConfig::read_left_write_right()));
    board.place_entity("0,0", Entity::Tool(tool)).unwrap();

    // NW side: read yes, write no.
    assert!(RbacEngine::check_permission(&board, "-1,0", "fs", Permission::Read).allowed);
    assert!(!RbacEngine::check_permission(&board, "-1,0", "fs", Permission::Write).allowed);

    // SE side: write yes, read no.
    assert!(RbacEngine::check_permission(&board, "1,0", "fs", Permission::Write).allowed);
    assert!(!RbacEngine::check_permission(&board, "1,0", "fs", Permission::Read).allowed);

    // S side belongs to the read zone.
    assert!(RbacEngine::check_permission(&board, "0,1", "fs", Permission::Read).allowed);
    assert!(!RbacEngine::check_permission(&board, "0,1", "fs", Permission::Write).allowed);
}

#[test]
fn test_zone_split_holds_at_longer_range() {
    // The same split classified through the angle cones instead of the
    // exact neighbor vectors.
    let mut board = BoardModel::new("s2b", "S2b", 4);
    let tool = ToolEntity::new("fs", "Files", "filesystem")
        .with_range(3)
        .with_rbac(RbacConfig::enabled().with_zones(ZoneConfig::read_left_write_right()));
    board.place_entity("0,0", Entity::Tool(tool)).unwrap();

    assert!(RbacEngine::check_permission(&board, "-3,0", "fs", Permission::Read).allowed);
    assert!(RbacEngine::check_permission(&board, "3,0", "fs", Permission::Write).allowed);
    assert!(RbacEngine::check_permission(&board, "0,3", "fs", Permission::Read).allowed);
    assert!(!RbacEngine::check_permission(&board, "0,3", "fs", Permission::Write).allowed);
}

#[test]
fn test_zone_visualization_matches_checks() {
    // The visualization and the checks share one classification; every
    // hex the visualization paints writable must pass a write check.
    let mut board = BoardModel::new("viz", "Viz", 3);
    let tool = ToolEntity::new("fs", "Files", "filesystem")
        .with_range(2)
        .with_rbac(RbacConfig::enabled().with_zones(ZoneConfig::read_left_write_right()));
    board.place_entity("0,0", Entity::Tool(tool)).unwrap();

    for zone_hex in RbacEngine::zone_visualization(&board, "fs", None) {
        for permission in [Permission::Read, Permission::Write, Permission::Execute].iter() {
            let painted = zone_hex.permissions.contains(permission);
            let checked =
                RbacEngine::check_permission(&board, &zone_hex.hex_key, "fs", *permission).allowed;
            assert_eq!(
                painted, checked,
                "disagreement at {} for {:?}",
                zone_hex.hex_key, permission
            );
        }
    }
}
