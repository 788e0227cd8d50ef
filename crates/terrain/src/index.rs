//! Mutable 2D spatial index over point bounding boxes.
//!
//! Thin wrapper around an `rstar` R-tree so the ingestion and attribution
//! code only sees keyed planar points. Keys are caller defined: ingestion
//! uses the point's sequence position, attribution uses the position of the
//! record in the snapshot the index was built from.

use rstar::primitives::GeomWithData;
use rstar::{PointDistance, RTree, AABB};

type IndexedPoint = GeomWithData<[f64; 2], usize>;

/// A keyed point returned by index queries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexHit {
    pub key: usize,
    pub xy: [f64; 2],
    pub distance: f64,
}

#[derive(Default)]
pub struct SpatialPointIndex {
    tree: RTree<IndexedPoint>,
}

impl SpatialPointIndex {
    pub fn new() -> Self {
        Self { tree: RTree::new() }
    }

    /// Build in one pass from a snapshot of `(xy, key)` pairs.
    pub fn bulk_load(points: impl IntoIterator<Item = ([f64; 2], usize)>) -> Self {
        let entries: Vec<IndexedPoint> = points
            .into_iter()
            .map(|(xy, key)| GeomWithData::new(xy, key))
            .collect();

        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    pub fn insert(&mut self, xy: [f64; 2], key: usize) {
        self.tree.insert(GeomWithData::new(xy, key));
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Every entry whose bounding box intersects the square around the
    /// buffer of `radius` centred on `xy`. No distance filtering.
    pub fn candidates(&self, xy: [f64; 2], radius: f64) -> impl Iterator<Item = IndexHit> + '_ {
        let envelope = AABB::from_corners(
            [xy[0] - radius, xy[1] - radius],
            [xy[0] + radius, xy[1] + radius],
        );

        self.tree
            .locate_in_envelope_intersecting(&envelope)
            .map(move |entry| {
                let p = *entry.geom();
                IndexHit {
                    key: entry.data,
                    xy: p,
                    distance: planar_distance(xy, p),
                }
            })
    }

    /// Nearest candidate within `tolerance` (inclusive), if any.
    ///
    /// Ties on distance resolve to the smaller key so results do not depend
    /// on the tree's internal layout.
    pub fn nearest_within(&self, xy: [f64; 2], tolerance: f64) -> Option<IndexHit> {
        self.candidates(xy, tolerance)
            .filter(|hit| hit.distance <= tolerance)
            .min_by(|a, b| {
                a.distance
                    .total_cmp(&b.distance)
                    .then_with(|| a.key.cmp(&b.key))
            })
    }

    /// Single nearest entry; equidistant entries resolve to the smaller key.
    pub fn nearest(&self, xy: [f64; 2]) -> Option<IndexHit> {
        let mut best: Option<(f64, &IndexedPoint)> = None;

        for entry in self.tree.nearest_neighbor_iter(&xy) {
            let d2 = entry.distance_2(&xy);
            match best {
                Some((best_d2, _)) if d2 > best_d2 => break,
                Some((_, current)) if entry.data >= current.data => {}
                _ => best = Some((d2, entry)),
            }
        }

        best.map(|(_, entry)| {
            let p = *entry.geom();
            IndexHit {
                key: entry.data,
                xy: p,
                distance: planar_distance(xy, p),
            }
        })
    }
}

#[inline]
pub(crate) fn planar_distance(a: [f64; 2], b: [f64; 2]) -> f64 {
    (a[0] - b[0]).hypot(a[1] - b[1])
}
