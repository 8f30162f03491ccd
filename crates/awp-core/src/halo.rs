// ─────────────────────────────────────────────────────────────────────
// AWP Elastic Core — Halo Exchange
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Ghost-cell regions and the per-axis exchange of velocity slabs.
//!
//! Every slab spans the full padded extent of the two other axes, so the
//! X exchange that follows the Y exchange carries the freshly received Y
//! ghosts along and fills the corner ghosts.
//!
//! Per axis and side with a neighbour:
//!
//! 1. device → pinned copy of the send slab on the side's stream
//! 2. wait for that copy only
//! 3. post receive and send
//! 4. wait on every posted request (count checked)
//! 5. pinned → device copy into the ghost slab, then sync the stream
//!
//! Sides without a neighbour post nothing and their ghosts keep whatever
//! they held.

use crate::comm::{Communicator, RequestSlots, Tag};
use crate::decomp::Neighbors;
use crate::device::{staged_len, Accelerator, FieldId, PinnedBuffer, StreamId};
use crate::grid::{Grid3D, PaddedShape, Region3};
use crate::profiling::ProfilingContext;
use awp_types::error::{AwpError, AwpResult};
use awp_types::index::Axis;
use std::ops::Range;
use tracing::trace;

// ── Sides and tags ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
    Front,
    Back,
}

impl Side {
    pub const ALL: [Side; 4] = [Side::Left, Side::Right, Side::Front, Side::Back];

    /// Low side first.
    pub fn of_axis(axis: Axis) -> [Side; 2] {
        match axis {
            Axis::X => [Side::Left, Side::Right],
            _ => [Side::Front, Side::Back],
        }
    }

    pub fn axis(self) -> Axis {
        match self {
            Side::Left | Side::Right => Axis::X,
            Side::Front | Side::Back => Axis::Y,
        }
    }

    pub fn is_low(self) -> bool {
        matches!(self, Side::Left | Side::Front)
    }

    /// Request slot within the axis: 0 low, 1 high.
    pub fn slot(self) -> usize {
        usize::from(!self.is_low())
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
            Side::Front => Side::Back,
            Side::Back => Side::Front,
        }
    }

    pub fn neighbor(self, n: &Neighbors) -> Option<usize> {
        match self {
            Side::Left => n.left,
            Side::Right => n.right,
            Side::Front => n.front,
            Side::Back => n.back,
        }
    }

    pub fn stream(self) -> StreamId {
        match self {
            Side::Left => StreamId::Left,
            Side::Right => StreamId::Right,
            Side::Front => StreamId::Front,
            Side::Back => StreamId::Back,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
            Side::Front => "front",
            Side::Back => "back",
        }
    }

    fn index(self) -> Tag {
        match self {
            Side::Left => 0,
            Side::Right => 1,
            Side::Front => 2,
            Side::Back => 3,
        }
    }

    /// Tag of data leaving through this side. One tag per axis and
    /// direction of travel.
    pub fn send_tag(self, channel: HaloChannel) -> Tag {
        channel.base() + self.index()
    }

    /// Tag of data arriving through this side.
    pub fn recv_tag(self, channel: HaloChannel) -> Tag {
        self.opposite().send_tag(channel)
    }
}

/// Which data set an exchange carries; keeps tags of separate exchanges apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaloChannel {
    Velocity,
    Media,
}

impl HaloChannel {
    fn base(self) -> Tag {
        match self {
            HaloChannel::Velocity => 0x10,
            HaloChannel::Media => 0x20,
        }
    }
}

// ── Geometry ─────────────────────────────────────────────────────────

/// Every region the timestep needs, computed once per rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HaloGeometry {
    pub shape: PaddedShape,
    pub neighbors: Neighbors,
}

impl HaloGeometry {
    pub fn new(shape: PaddedShape, neighbors: Neighbors) -> Self {
        HaloGeometry { shape, neighbors }
    }

    pub fn width(&self) -> usize {
        self.shape.padding.ghost_width()
    }

    fn axis_parts(&self, axis: Axis) -> (Range<usize>, usize) {
        match axis {
            Axis::X => (self.shape.interior_x(), self.shape.nxt),
            _ => (self.shape.interior_y(), self.shape.nyt),
        }
    }

    fn slab(&self, axis: Axis, along: Range<usize>) -> Region3 {
        let full = self.shape.full();
        match axis {
            Axis::X => Region3::new(along, full.y, full.z),
            _ => Region3::new(full.x, along, full.z),
        }
    }

    pub fn has_neighbor(&self, side: Side) -> bool {
        side.neighbor(&self.neighbors).is_some()
    }

    /// Interior cells sent through `side`.
    pub fn send_region(&self, side: Side) -> Region3 {
        let (interior, _) = self.axis_parts(side.axis());
        let w = self.width();
        let along = if side.is_low() {
            interior.start..interior.start + w
        } else {
            interior.end - w..interior.end
        };
        self.slab(side.axis(), along)
    }

    /// Ghost cells filled by data arriving through `side`.
    pub fn recv_region(&self, side: Side) -> Region3 {
        let (interior, _) = self.axis_parts(side.axis());
        let w = self.width();
        let along = if side.is_low() {
            interior.start - w..interior.start
        } else {
            interior.end..interior.end + w
        };
        self.slab(side.axis(), along)
    }

    /// Values staged per slab for `fields`.
    pub fn slab_len(&self, side: Side, fields: usize) -> usize {
        fields * self.send_region(side).len()
    }

    /// Velocity cells updated ahead of the Y exchange on `side`; `None`
    /// without a neighbour there.
    pub fn velocity_boundary(&self, side: Side) -> Option<Region3> {
        if side.axis() != Axis::Y || !self.has_neighbor(side) {
            return None;
        }
        let y = self.send_region(side).y;
        Some(Region3::new(
            self.shape.interior_x(),
            y,
            self.shape.interior_z(),
        ))
    }

    /// Velocity cells left after the Y boundary slabs.
    pub fn velocity_interior(&self) -> Region3 {
        let y = self.shape.interior_y();
        let w = self.width();
        let start = if self.neighbors.front.is_some() { y.start + w } else { y.start };
        let end = if self.neighbors.back.is_some() { y.end - w } else { y.end };
        Region3::new(
            self.shape.interior_x(),
            start..end.max(start),
            self.shape.interior_z(),
        )
    }

    /// Stress update extent: interior, two cells deeper into the ghosts on
    /// each side with a neighbour.
    pub fn stress_region(&self) -> Region3 {
        let widen = |r: Range<usize>, lo: bool, hi: bool| {
            let s = if lo { r.start - 2 } else { r.start };
            let e = if hi { r.end + 2 } else { r.end };
            s..e
        };
        let n = &self.neighbors;
        Region3::new(
            widen(self.shape.interior_x(), n.left.is_some(), n.right.is_some()),
            widen(self.shape.interior_y(), n.front.is_some(), n.back.is_some()),
            self.shape.interior_z(),
        )
    }
}

// ── Host packing ─────────────────────────────────────────────────────

/// Copy `region` of each grid, back to back.
pub fn pack_slab<'a>(grids: impl IntoIterator<Item = &'a Grid3D>, region: &Region3) -> Vec<f32> {
    let mut out = Vec::new();
    for g in grids {
        out.extend(g.region(region).iter().copied());
    }
    out
}

/// Inverse of [`pack_slab`].
pub fn unpack_slab<'a>(
    grids: impl IntoIterator<Item = &'a mut Grid3D>,
    region: &Region3,
    data: &[f32],
) -> AwpResult<()> {
    let n = region.len();
    let mut chunks = data.chunks_exact(n.max(1));
    let mut used = 0;
    for g in grids {
        let chunk = chunks
            .next()
            .ok_or_else(|| AwpError::Layout(format!("slab of {} values too short for {}", data.len(), g.label)))?;
        for (d, s) in g.region_mut(region).iter_mut().zip(chunk) {
            *d = *s;
        }
        used += n;
    }
    if used != data.len() {
        return Err(AwpError::Layout(format!(
            "slab of {} values, {used} consumed",
            data.len()
        )));
    }
    Ok(())
}

/// Blocking host-side exchange of arbitrary grids, Y then X. Used for the
/// one-off material swap at startup.
pub fn exchange_host<C: Communicator>(
    geometry: &HaloGeometry,
    grids: &mut [&mut Grid3D],
    comm: &C,
    channel: HaloChannel,
) -> AwpResult<()> {
    for axis in [Axis::Y, Axis::X] {
        let sides = Side::of_axis(axis);
        let mut slots: RequestSlots<C> = RequestSlots::new(comm.rank());
        let mut expected = 0;
        let mut incoming: [Vec<f32>; 2] = [Vec::new(), Vec::new()];
        for side in sides {
            let Some(peer) = side.neighbor(&geometry.neighbors) else {
                continue;
            };
            let len = geometry.slab_len(side, grids.len());
            incoming[side.slot()] = vec![0.0; len];
            slots.post_recv(side.slot(), comm.irecv(peer, side.recv_tag(channel), len)?)?;
            let send = pack_slab(grids.iter().map(|g| &**g), &geometry.send_region(side));
            slots.post_send(side.slot(), comm.isend(peer, side.send_tag(channel), &send)?)?;
            expected += 2;
        }
        let [lo, hi] = &mut incoming;
        let outs = [
            geometry.has_neighbor(sides[0]).then_some(lo.as_mut_slice()),
            geometry.has_neighbor(sides[1]).then_some(hi.as_mut_slice()),
        ];
        slots.wait_all(comm, expected, outs)?;
        for side in sides {
            if geometry.has_neighbor(side) {
                unpack_slab(
                    grids.iter_mut().map(|g| &mut **g),
                    &geometry.recv_region(side),
                    &incoming[side.slot()],
                )?;
            }
        }
    }
    Ok(())
}

// ── Device exchange ──────────────────────────────────────────────────

struct AxisBuffers<P> {
    send: [Option<P>; 2],
    recv: [Option<P>; 2],
}

/// Pinned staging buffers and the exchange routine for velocity ghosts.
/// Buffers exist only for sides that have a neighbour and are reused
/// every step.
pub struct HaloExchanger<P: PinnedBuffer> {
    geometry: HaloGeometry,
    buffers: [AxisBuffers<P>; 2],
}

impl<P: PinnedBuffer> HaloExchanger<P> {
    pub fn new<A>(geometry: HaloGeometry, dev: &mut A, profiling: &mut ProfilingContext) -> AwpResult<Self>
    where
        A: Accelerator<Pinned = P>,
    {
        let mut alloc = |side: Side, dir: &str| -> AwpResult<Option<P>> {
            if !geometry.has_neighbor(side) {
                return Ok(None);
            }
            let len = staged_len(&FieldId::VELOCITY, &geometry.send_region(side));
            dev.alloc_pinned(&format!("halo_{dir}_{}", side.label()), len, profiling)
                .map(Some)
        };
        let mut per_axis = |axis: Axis| -> AwpResult<AxisBuffers<P>> {
            let [lo, hi] = Side::of_axis(axis);
            Ok(AxisBuffers {
                send: [alloc(lo, "send")?, alloc(hi, "send")?],
                recv: [alloc(lo, "recv")?, alloc(hi, "recv")?],
            })
        };
        let x = per_axis(Axis::X)?;
        let y = per_axis(Axis::Y)?;
        Ok(HaloExchanger {
            geometry,
            buffers: [x, y],
        })
    }

    pub fn geometry(&self) -> &HaloGeometry {
        &self.geometry
    }

    /// Refresh the velocity ghosts of `axis`.
    pub fn exchange<A, C>(&mut self, axis: Axis, dev: &mut A, comm: &C) -> AwpResult<()>
    where
        A: Accelerator<Pinned = P>,
        C: Communicator,
    {
        let sides = Side::of_axis(axis);
        let geometry = &self.geometry;
        let bufs = match axis {
            Axis::X => &mut self.buffers[0],
            _ => &mut self.buffers[1],
        };

        for side in sides {
            if let Some(buf) = bufs.send[side.slot()].as_mut() {
                dev.enqueue_to_pinned(side.stream(), &FieldId::VELOCITY, &geometry.send_region(side), buf)?;
            }
        }
        for side in sides {
            if let Some(buf) = bufs.send[side.slot()].as_mut() {
                dev.wait_pinned(side.stream(), buf)?;
            }
        }

        let mut slots: RequestSlots<C> = RequestSlots::new(comm.rank());
        let mut expected = 0;
        for side in sides {
            let (Some(peer), Some(send), Some(recv)) = (
                side.neighbor(&geometry.neighbors),
                bufs.send[side.slot()].as_ref(),
                bufs.recv[side.slot()].as_ref(),
            ) else {
                continue;
            };
            slots.post_recv(side.slot(), comm.irecv(peer, side.recv_tag(HaloChannel::Velocity), recv.len())?)?;
            slots.post_send(side.slot(), comm.isend(peer, side.send_tag(HaloChannel::Velocity), send.host())?)?;
            expected += 2;
            trace!(rank = comm.rank(), peer, side = side.label(), "halo posted");
        }
        let [lo, hi] = &mut bufs.recv;
        slots.wait_all(
            comm,
            expected,
            [lo.as_mut().map(|b| b.host_mut()), hi.as_mut().map(|b| b.host_mut())],
        )?;

        for side in sides {
            if let Some(buf) = bufs.recv[side.slot()].as_ref() {
                dev.enqueue_from_pinned(side.stream(), buf, &FieldId::VELOCITY, &geometry.recv_region(side))?;
            }
        }
        for side in sides {
            if geometry.has_neighbor(side) {
                dev.synchronize(side.stream())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::LocalCluster;
    use crate::decomp::{subdomain, ProcessGrid};
    use crate::grid::Padding;

    fn geometry(neighbors: Neighbors) -> HaloGeometry {
        let shape = PaddedShape::new(16, 12, 6, Padding::new(1, 2).expect("padding")).expect("shape");
        HaloGeometry::new(shape, neighbors)
    }

    fn all_neighbors() -> Neighbors {
        Neighbors {
            left: Some(0),
            right: Some(1),
            front: Some(2),
            back: Some(3),
        }
    }

    #[test]
    fn test_tags_pair_up_across_ranks() {
        for side in Side::ALL {
            assert_eq!(side.send_tag(HaloChannel::Velocity), side.opposite().recv_tag(HaloChannel::Velocity));
            assert_ne!(side.send_tag(HaloChannel::Velocity), side.recv_tag(HaloChannel::Velocity));
            assert_ne!(side.send_tag(HaloChannel::Velocity), side.send_tag(HaloChannel::Media));
        }
    }

    #[test]
    fn test_send_and_recv_regions() {
        let g = geometry(all_neighbors());
        let (px, py, pz) = g.shape.dims();
        assert_eq!(g.send_region(Side::Left), Region3::new(6..10, 0..py, 0..pz));
        assert_eq!(g.send_region(Side::Right), Region3::new(18..22, 0..py, 0..pz));
        assert_eq!(g.recv_region(Side::Left), Region3::new(2..6, 0..py, 0..pz));
        assert_eq!(g.recv_region(Side::Right), Region3::new(22..26, 0..py, 0..pz));
        assert_eq!(g.recv_region(Side::Back), Region3::new(0..px, 18..22, 0..pz));
        assert_eq!(g.slab_len(Side::Front, 3), 3 * 4 * px * pz);
    }

    #[test]
    fn test_compute_regions_depend_on_neighbors() {
        let g = geometry(all_neighbors());
        assert_eq!(g.velocity_boundary(Side::Front).map(|r| r.y), Some(6..10));
        assert_eq!(g.velocity_boundary(Side::Left), None);
        assert_eq!(g.velocity_interior().y, 10..14);
        assert_eq!(g.stress_region().x, 4..24);

        let open = geometry(Neighbors { back: Some(1), ..Neighbors::default() });
        assert_eq!(open.velocity_boundary(Side::Front), None);
        assert_eq!(open.velocity_interior().y, 6..14);
        assert_eq!(open.stress_region().x, 6..22);
        assert_eq!(open.stress_region().y, 6..20);
    }

    #[test]
    fn test_pack_unpack_roundtrip() {
        let g = geometry(all_neighbors());
        let mut a = Grid3D::zeros("a", &g.shape);
        let mut b = Grid3D::zeros("b", &g.shape);
        for (n, v) in a.data.iter_mut().enumerate() {
            *v = n as f32 * 0.5;
        }
        for (n, v) in b.data.iter_mut().enumerate() {
            *v = -(n as f32);
        }
        let region = g.send_region(Side::Right);
        let packed = pack_slab([&a, &b], &region);
        assert_eq!(packed.len(), 2 * region.len());

        let mut c = Grid3D::zeros("c", &g.shape);
        let mut d = Grid3D::zeros("d", &g.shape);
        unpack_slab([&mut c, &mut d], &region, &packed).expect("unpack");
        assert_eq!(c.region(&region), a.region(&region));
        assert_eq!(d.region(&region), b.region(&region));
        assert!(unpack_slab([&mut c], &region, &packed).is_err());
    }

    #[test]
    fn test_host_exchange_fills_ghosts_from_neighbors() {
        let grid = ProcessGrid::new(2, 1).expect("grid");
        let padding = Padding::new(1, 2).expect("padding");
        let cluster = LocalCluster::new(2).expect("cluster");
        let results = cluster
            .run(|comm| {
                let sub = subdomain(comm.rank(), (32, 8, 4), grid)?;
                let shape = sub.shape(padding)?;
                let geometry = HaloGeometry::new(shape, sub.neighbors);
                let mut g = Grid3D::zeros("probe", &shape);
                g.region_mut(&shape.interior()).fill(comm.rank() as f32 + 1.0);
                exchange_host(&geometry, &mut [&mut g], &comm, HaloChannel::Media)?;
                Ok((comm.rank(), g))
            })
            .expect("run");
        let (_, left) = &results[0];
        let (_, right) = &results[1];
        // rank 0 right ghost holds rank 1 interior; its left ghost untouched
        assert_eq!(left.data[[22, 8, 3]], 2.0);
        assert_eq!(left.data[[5, 8, 3]], 0.0);
        assert_eq!(right.data[[5, 8, 3]], 1.0);
        assert_eq!(right.data[[22, 8, 3]], 0.0);
    }
}
