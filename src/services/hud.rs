//! Pointer-driven HUD tools: vertex snapping, marker picking and distance
//! measurement. Every call ends with a frame request.

use super::ServiceContext;
use glam::{Vec2, Vec3};

pub fn set_vertex_snap_at_point(ctx: &mut ServiceContext<'_>, client: Vec2) {
    let snap = ctx.snap_point_at(client);
    ctx.render.hud_mut().point_snap.set_snap_point(snap);
    ctx.render.request_render(None, false);
}

pub fn select_vertex_at_point(ctx: &mut ServiceContext<'_>, client: Vec2) {
    let snap = ctx.snap_point_at(client);
    ctx.render
        .hud_mut()
        .point_snap
        .set_selected(snap.into_iter().collect());
    ctx.render.request_render(None, false);
}

pub fn highlight_sprite_at_point(ctx: &mut ServiceContext<'_>, client: Vec2) {
    let id = marker_id_at(ctx, client);
    ctx.render.hud_mut().markers.highlight_marker(id.as_deref());
    ctx.render.request_render(None, false);
}

pub fn select_sprite_at_point(ctx: &mut ServiceContext<'_>, client: Vec2) {
    let ids: Vec<String> = marker_id_at(ctx, client).into_iter().collect();
    ctx.render.hud_mut().markers.set_selected(&ids, true);
    ctx.render.request_render(None, false);
}

/// Moves the measurer's end to the snapped vertex under the pointer. A miss
/// clears the measurement.
pub fn measure_distance_at_point(ctx: &mut ServiceContext<'_>, client: Vec2) {
    let end = ctx
        .snap_point_at(client)
        .map(|snap| Vec3::from_array(snap.position));
    ctx.render.hud_mut().measurer.set_end_marker(end);
    ctx.render.request_render(None, false);
}

fn marker_id_at(ctx: &ServiceContext<'_>, client: Vec2) -> Option<String> {
    let point = ctx.render.client_to_canvas_zero_center(client);
    let projection = ctx.render.hud_projection();
    ctx.render
        .hud()
        .markers
        .marker_at(&projection, point)
        .map(|marker| marker.id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ViewerEvent;
    use crate::render::MarkerInfo;
    use crate::services::test_support::Fixture;

    fn corner_of(fx: &Fixture, index: usize) -> (Vec3, Vec2) {
        let handle = fx.loader.mesh_handles()[index];
        let mesh = fx.loader.mesh(handle).unwrap();
        // Front top-left corner faces the default camera.
        let corner = mesh.world.transform_point3(Vec3::new(-0.5, 0.5, 0.5));
        let towards_center = (mesh.world_sphere_center() - corner) * 0.1;
        (corner, fx.render.world_to_canvas(corner + towards_center))
    }

    #[test]
    fn vertex_snap_follows_the_pointer() {
        let mut fx = Fixture::new(2);
        let (corner, point) = corner_of(&fx, 0);
        set_vertex_snap_at_point(&mut fx.ctx(), point);
        let snap = fx.render.hud().point_snap.current().cloned().unwrap();
        assert_eq!(snap.mesh_id, fx.mesh_id(0));
        assert!((Vec3::from_array(snap.position) - corner).length() < 1e-4);

        set_vertex_snap_at_point(&mut fx.ctx(), Vec2::new(1.0, 1.0));
        assert!(fx.render.hud().point_snap.current().is_none());
        assert!(fx.render.has_pending_frame());
    }

    #[test]
    fn selecting_a_vertex_replaces_the_selected_points() {
        let mut fx = Fixture::new(2);
        let (_, point) = corner_of(&fx, 1);
        select_vertex_at_point(&mut fx.ctx(), point);
        assert_eq!(fx.render.hud().point_snap.selected().len(), 1);
        select_vertex_at_point(&mut fx.ctx(), Vec2::new(1.0, 1.0));
        assert!(fx.render.hud().point_snap.selected().is_empty());
    }

    #[test]
    fn sprite_under_pointer_is_highlighted_and_selected() {
        let mut fx = Fixture::new(1);
        let target = fx.render.camera().target;
        fx.render
            .hud_mut()
            .markers
            .set_markers(vec![MarkerInfo::new("m-1", "note", target.to_array())]);
        fx.drain();

        let center = fx.render.world_to_canvas(target);
        highlight_sprite_at_point(&mut fx.ctx(), center);
        assert_eq!(fx.render.hud().markers.highlighted(), Some("m-1"));

        select_sprite_at_point(&mut fx.ctx(), center + Vec2::new(4.0, 0.0));
        assert!(fx.render.hud().markers.is_selected("m-1"));
        let manual = fx
            .drain()
            .into_iter()
            .any(|e| matches!(e, ViewerEvent::MarkersSelected { manual: true, .. }));
        assert!(manual);

        select_sprite_at_point(&mut fx.ctx(), Vec2::new(1.0, 1.0));
        assert!(!fx.render.hud().markers.is_selected("m-1"));
    }

    #[test]
    fn measuring_between_two_vertices() {
        let mut fx = Fixture::new(2);
        let (start, p0) = corner_of(&fx, 0);
        let (end, p1) = corner_of(&fx, 1);
        measure_distance_at_point(&mut fx.ctx(), p0);
        measure_distance_at_point(&mut fx.ctx(), p1);
        let distance = fx.render.hud().measurer.distance().unwrap();
        assert!((distance.distance[3] - start.distance(end)).abs() < 1e-4);
    }
}
