//! Shared fixtures for the PBF behaviour suites.

use osmerge_core::{Bbox, EntityKind, Info, Member, Node, Osm, Relation, Tags, Way};

pub fn tags(pairs: &[(&str, &str)]) -> Tags {
    pairs
        .iter()
        .map(|&(key, value)| (key.to_owned(), value.to_owned()))
        .collect()
}

/// A small dataset exercising every entity kind, tags, metadata, and a
/// closed way.
pub fn sample_store() -> Osm {
    let mut osm = Osm::new();
    osm.header.bbox = Some(Bbox {
        left: 13.30,
        bottom: 52.45,
        right: 13.50,
        top: 52.55,
    });
    osm.header.required_features =
        vec!["OsmSchema-V0.6".to_owned(), "DenseNodes".to_owned()];

    let info = Info {
        version: 2,
        timestamp: 1_700_000_000,
        changeset: 42,
        uid: 7,
        user: Some("mapper".to_owned()),
        visible: true,
    };
    for id in 1..=6_i64 {
        let mut node = Node::new(
            id,
            13.40 + 0.001 * id as f64,
            52.50 + 0.0005 * id as f64,
        );
        if id == 1 {
            node.tags = tags(&[("amenity", "cafe"), ("name", "corner")]);
        }
        node.info = Some(Info {
            version: info.version + id as i32,
            ..info.clone()
        });
        osm.add_node(&node).expect("add node");
    }

    osm.add_way(&Way {
        tags: tags(&[("highway", "residential")]),
        ..Way::new(101, vec![1, 2, 3])
    })
    .expect("add way");
    // A closed way: the first ref repeats last.
    osm.add_way(&Way {
        tags: tags(&[("building", "yes")]),
        ..Way::new(102, vec![3, 4, 5, 6, 3])
    })
    .expect("add way");

    osm.add_relation(&Relation {
        id: 201,
        members: vec![
            Member {
                kind: EntityKind::Way,
                member_ref: 102,
                role: "outer".to_owned(),
            },
            Member {
                kind: EntityKind::Node,
                member_ref: 1,
                role: String::new(),
            },
        ],
        tags: tags(&[("type", "multipolygon")]),
        info: None,
    })
    .expect("add relation");

    osm.finish().expect("finish");
    osm
}
