//! PDF badge placer (§4.8).
//!
//! Annotates a floorplan PDF with one badge per device, anchored near its
//! assigned location's polygon centroid and connected to it with a
//! straight, non-crossing leader line. Placement is pure geometry
//! (`layout`, testable without touching a PDF); `render` is the only part
//! that talks to `lopdf`.

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, Stream};

use crate::error::{DiscoveryError, Result};
use crate::model::device::DeviceType;
use crate::model::{Device, LocationPolygon, Point};

const POLYGON_STROKE: (f32, f32, f32) = (0.545, 0.361, 0.965); // #8b5cf6
const BADGE_WIDTH: f64 = 170.0;
const ROW_HEIGHT: f64 = 16.0;
const ROW_GAP: f64 = 6.0;
const CENTROID_RADIUS: f64 = 12.0;
const LEADER_SHADOW_OFFSET: f64 = 0.75;

/// One device's badge content, already split into the fixed field order
/// `{icon, asset_tag?, vendor+model, serial?}` (§4.8 step 2).
#[derive(Debug, Clone)]
struct BadgeContent {
    device_mac: String,
    device_type: DeviceType,
    rows: Vec<String>,
}

impl BadgeContent {
    fn from_device(device: &Device) -> Self {
        let mut rows = Vec::new();
        if let Some(tag) = &device.asset_tag {
            rows.push(tag.clone());
        }
        let vendor_model = match (&device.vendor, &device.model) {
            (Some(v), Some(m)) => format!("{v} {m}"),
            (Some(v), None) => v.clone(),
            (None, Some(m)) => m.clone(),
            (None, None) => device.hostname.clone().unwrap_or_else(|| device.primary_mac.clone()),
        };
        rows.push(vendor_model);
        if let Some(serial) = &device.serial {
            rows.push(serial.clone());
        }

        Self {
            device_mac: device.primary_mac.clone(),
            device_type: device.effective_type().parse().unwrap_or(DeviceType::EndDevice),
            rows,
        }
    }

    fn height(&self) -> f64 {
        // +1 row reserved for the icon/header section (§4.8 step 2).
        (self.rows.len() as f64 + 1.0) * ROW_HEIGHT + ROW_GAP
    }
}

/// A fully-placed badge, in PDF points, after all relaxation passes.
#[derive(Debug, Clone)]
pub struct PlacedBadge {
    pub device_mac: String,
    pub device_type: DeviceType,
    pub rows: Vec<String>,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub centroid: Point,
}

impl PlacedBadge {
    fn left_edge_center(&self) -> Point {
        Point { x: self.x, y: self.y + self.height / 2.0 }
    }

    fn overlaps(&self, other: &PlacedBadge) -> bool {
        self.x < other.x + other.width
            && other.x < self.x + self.width
            && self.y < other.y + other.height
            && other.y < self.y + self.height
    }

    fn overlaps_circle(&self, center: Point, radius: f64) -> bool {
        let closest_x = center.x.clamp(self.x, self.x + self.width);
        let closest_y = center.y.clamp(self.y, self.y + self.height);
        let dx = center.x - closest_x;
        let dy = center.y - closest_y;
        (dx * dx + dy * dy).sqrt() < radius
    }
}

/// Lays out every badge for one location's devices (§4.8 steps 3-4) inside
/// a `page_width` x `page_height` page. `stack_down` alternates per
/// location in sorted-centroid-Y order (even index = down, odd = up),
/// matching the spec's "stack direction alternating by sorted centroid Y".
pub fn layout(
    polygon: &LocationPolygon,
    devices: &[Device],
    stack_down: bool,
    page_width: f64,
    page_height: f64,
) -> Vec<PlacedBadge> {
    let centroid = polygon.centroid();

    let mut sorted_devices = devices.to_vec();
    sorted_devices.sort_by(|a, b| a.primary_mac.cmp(&b.primary_mac));

    let mut badges: Vec<PlacedBadge> = Vec::with_capacity(sorted_devices.len());
    let mut cursor = 0.0;
    for device in &sorted_devices {
        let content = BadgeContent::from_device(device);
        let height = content.height();

        let y = if stack_down {
            centroid.y - height / 2.0 - cursor
        } else {
            centroid.y - height / 2.0 + cursor
        };
        cursor += height + ROW_GAP;

        badges.push(PlacedBadge {
            device_mac: content.device_mac,
            device_type: content.device_type,
            rows: content.rows,
            x: centroid.x + 10.0,
            y,
            width: BADGE_WIDTH,
            height,
            centroid,
        });
    }

    relax(&mut badges, page_width, page_height);
    badges
}

/// The four-plus-clamp relaxation sequence from §4.8 step 3. Operates on
/// one location's badge stack: cross-location overlap is not attempted
/// since different locations' anchors are assumed spatially separated on
/// the floorplan.
fn relax(badges: &mut [PlacedBadge], page_width: f64, page_height: f64) {
    if badges.is_empty() {
        return;
    }

    resolve_badge_overlap(badges); // (i)
    resolve_centroid_overlap(badges); // (ii)
    resolve_badge_overlap(badges); // (iii)
    uncross_leader_lines(badges); // (iv)
    resolve_leader_blocking(badges); // (v)
    resolve_badge_overlap(badges); // (vi)
    clamp_to_bounds(badges, page_width, page_height); // (vii)
}

/// (i)/(iii)/(vi): pairwise overlap resolution by displacing the
/// later-indexed badge further along its own stack direction.
fn resolve_badge_overlap(badges: &mut [PlacedBadge]) {
    for _ in 0..badges.len() {
        let mut moved = false;
        for i in 0..badges.len() {
            for j in (i + 1)..badges.len() {
                if badges[i].overlaps(&badges[j]) {
                    let shift = badges[i].height.min(badges[j].height) + ROW_GAP;
                    let direction = if badges[j].y <= badges[j].centroid.y { -1.0 } else { 1.0 };
                    badges[j].y += direction * shift;
                    moved = true;
                }
            }
        }
        if !moved {
            break;
        }
    }
}

/// (ii): push a badge away from the centroid circle if its bounding box
/// intersects it.
fn resolve_centroid_overlap(badges: &mut [PlacedBadge]) {
    for badge in badges.iter_mut() {
        let mut guard = 0;
        while badge.overlaps_circle(badge.centroid, CENTROID_RADIUS) && guard < 16 {
            let direction = if badge.y <= badge.centroid.y { -1.0 } else { 1.0 };
            badge.y += direction * 2.0;
            guard += 1;
        }
    }
}

/// (iv): swaps badge Y positions in pairs when doing so removes a leader
/// line crossing, up to 10 iterations (§4.8 step 3).
fn uncross_leader_lines(badges: &mut [PlacedBadge]) {
    for _ in 0..10 {
        let mut swapped = false;
        for i in 0..badges.len() {
            for j in (i + 1)..badges.len() {
                if segments_cross(
                    badges[i].centroid,
                    badges[i].left_edge_center(),
                    badges[j].centroid,
                    badges[j].left_edge_center(),
                ) {
                    let (yi, yj) = (badges[i].y, badges[j].y);
                    badges[j].y = yi;
                    badges[i].y = yj;
                    swapped = true;
                }
            }
        }
        if !swapped {
            break;
        }
    }
}

/// (v): a badge's bounding box blocking another badge's leader-line segment
/// gets displaced further along its stack direction, up to 5 iterations.
fn resolve_leader_blocking(badges: &mut [PlacedBadge]) {
    for _ in 0..5 {
        let mut moved = false;
        for i in 0..badges.len() {
            for j in 0..badges.len() {
                if i == j {
                    continue;
                }
                let line_from = badges[j].centroid;
                let line_to = badges[j].left_edge_center();
                if badges[i].overlaps_segment(line_from, line_to) {
                    let direction = if badges[i].y <= badges[i].centroid.y { -1.0 } else { 1.0 };
                    badges[i].y += direction * (badges[i].height + ROW_GAP);
                    moved = true;
                }
            }
        }
        if !moved {
            break;
        }
    }
}

/// (vii): clamps every badge fully inside the page. Takes priority over
/// any crossing this reintroduces (§9 open question (c)).
fn clamp_to_bounds(badges: &mut [PlacedBadge], page_width: f64, page_height: f64) {
    for badge in badges.iter_mut() {
        badge.x = badge.x.clamp(0.0, (page_width - badge.width).max(0.0));
        badge.y = badge.y.clamp(0.0, (page_height - badge.height).max(0.0));
    }
}

impl PlacedBadge {
    fn overlaps_segment(&self, from: Point, to: Point) -> bool {
        let corners = [
            (Point { x: self.x, y: self.y }, Point { x: self.x + self.width, y: self.y }),
            (
                Point { x: self.x + self.width, y: self.y },
                Point { x: self.x + self.width, y: self.y + self.height },
            ),
            (
                Point { x: self.x + self.width, y: self.y + self.height },
                Point { x: self.x, y: self.y + self.height },
            ),
            (Point { x: self.x, y: self.y + self.height }, Point { x: self.x, y: self.y }),
        ];
        corners.iter().any(|(a, b)| segments_cross(*a, *b, from, to))
    }
}

/// Proper segment intersection test excluding shared endpoints (§8
/// property 6).
fn segments_cross(p1: Point, p2: Point, p3: Point, p4: Point) -> bool {
    let d1 = cross(p3, p4, p1);
    let d2 = cross(p3, p4, p2);
    let d3 = cross(p1, p2, p3);
    let d4 = cross(p1, p2, p4);

    const EPS: f64 = 0.01;
    if d1.abs() < EPS || d2.abs() < EPS || d3.abs() < EPS || d4.abs() < EPS {
        return false;
    }

    ((d1 > 0.0) != (d2 > 0.0)) && ((d3 > 0.0) != (d4 > 0.0))
}

fn cross(a: Point, b: Point, c: Point) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

/// One location's worth of finished placement: the polygon itself plus its
/// badges, ready to be drawn (§4.8 steps 1, 4).
pub struct LocationLayout {
    pub polygon: LocationPolygon,
    pub label: String,
    pub badges: Vec<PlacedBadge>,
}

/// Loads `pdf_path`, draws every location's polygon, label, badges, and
/// leader lines onto its first page, and writes the result to `out_path`
/// (§4.8). Rendering itself has no placement logic — everything here comes
/// from an already-`layout`'d `LocationLayout`.
pub fn render(pdf_path: &str, out_path: &str, page_width: f64, page_height: f64, layouts: &[LocationLayout]) -> Result<()> {
    let mut doc = Document::load(pdf_path).map_err(|e| DiscoveryError::Fatal {
        reason: format!("failed to load floorplan PDF: {e}"),
    })?;

    let page_id = *doc
        .get_pages()
        .values()
        .next()
        .ok_or_else(|| DiscoveryError::Fatal { reason: "floorplan PDF has no pages".into() })?;

    let mut ops = Vec::new();
    for layout in layouts {
        draw_polygon(&mut ops, layout, page_height);
        for badge in &layout.badges {
            draw_leader_line(&mut ops, badge, page_height);
            draw_badge(&mut ops, badge, page_height);
        }
    }

    let content = Content { operations: ops };
    let content_bytes = content.encode().map_err(|e| DiscoveryError::Fatal {
        reason: format!("failed to encode overlay content stream: {e}"),
    })?;
    let stream_id = doc.add_object(Stream::new(Dictionary::new(), content_bytes));

    append_content_stream(&mut doc, page_id, stream_id)?;
    register_overlay_resources(&mut doc, page_id)?;

    doc.save(out_path).map_err(|e| DiscoveryError::Fatal {
        reason: format!("failed to save annotated PDF: {e}"),
    })?;

    Ok(())
}

/// Registers the `/Helvetica` font and `/LeaderShadow` ext-gstate the
/// overlay content stream references (`Tf`/`gs` operators at
/// `draw_polygon`/`draw_leader_line`/`draw_badge`) into the page's
/// `/Resources`, merging into whatever font/ext-gstate entries the
/// floorplan already carries rather than replacing them. A `Tf` or `gs`
/// naming a resource absent from `/Resources` is invalid PDF and most
/// viewers simply drop the operation, so the badge text and leader
/// shadow would silently disappear without this (§4.8).
fn register_overlay_resources(doc: &mut Document, page_id: (u32, u16)) -> Result<()> {
    let mut font_dict = Dictionary::new();
    font_dict.set("Type", Object::Name(b"Font".to_vec()));
    font_dict.set("Subtype", Object::Name(b"Type1".to_vec()));
    font_dict.set("BaseFont", Object::Name(b"Helvetica".to_vec()));
    let font_id = doc.add_object(Object::Dictionary(font_dict));

    let mut leader_shadow_dict = Dictionary::new();
    leader_shadow_dict.set("Type", Object::Name(b"ExtGState".to_vec()));
    leader_shadow_dict.set("ca", 0.2.into());
    leader_shadow_dict.set("CA", 0.2.into());
    let leader_shadow_id = doc.add_object(Object::Dictionary(leader_shadow_dict));

    let existing_resources = {
        let page = doc.get_object(page_id).map_err(|e| DiscoveryError::Fatal {
            reason: format!("floorplan PDF page object missing: {e}"),
        })?;
        let Object::Dictionary(page_dict) = page else {
            return Err(DiscoveryError::Fatal { reason: "floorplan PDF page is not a dictionary".into() });
        };
        page_dict.get(b"Resources").ok().cloned()
    };

    let mut resources = match existing_resources {
        Some(Object::Dictionary(d)) => d,
        Some(Object::Reference(r)) => match doc.get_object(r) {
            Ok(Object::Dictionary(d)) => d.clone(),
            _ => Dictionary::new(),
        },
        _ => Dictionary::new(),
    };

    let mut fonts = match resources.get(b"Font") {
        Ok(Object::Dictionary(d)) => d.clone(),
        _ => Dictionary::new(),
    };
    fonts.set("Helvetica", Object::Reference(font_id));
    resources.set("Font", Object::Dictionary(fonts));

    let mut ext_gstates = match resources.get(b"ExtGState") {
        Ok(Object::Dictionary(d)) => d.clone(),
        _ => Dictionary::new(),
    };
    ext_gstates.set("LeaderShadow", Object::Reference(leader_shadow_id));
    resources.set("ExtGState", Object::Dictionary(ext_gstates));

    let page = doc.get_object_mut(page_id).map_err(|e| DiscoveryError::Fatal {
        reason: format!("floorplan PDF page object missing: {e}"),
    })?;
    let Object::Dictionary(page_dict) = page else {
        return Err(DiscoveryError::Fatal { reason: "floorplan PDF page is not a dictionary".into() });
    };
    page_dict.set("Resources", Object::Dictionary(resources));

    Ok(())
}

fn append_content_stream(doc: &mut Document, page_id: (u32, u16), stream_id: (u32, u16)) -> Result<()> {
    let page = doc.get_object_mut(page_id).map_err(|e| DiscoveryError::Fatal {
        reason: format!("floorplan PDF page object missing: {e}"),
    })?;

    let Object::Dictionary(page_dict) = page else {
        return Err(DiscoveryError::Fatal { reason: "floorplan PDF page is not a dictionary".into() });
    };

    match page_dict.get(b"Contents").map(|o| o.clone()) {
        Ok(Object::Array(mut arr)) => {
            arr.push(Object::Reference(stream_id));
            page_dict.set("Contents", Object::Array(arr));
        }
        Ok(existing @ Object::Reference(_)) => {
            page_dict.set("Contents", Object::Array(vec![existing, Object::Reference(stream_id)]));
        }
        _ => {
            page_dict.set("Contents", Object::Reference(stream_id));
        }
    }

    Ok(())
}

fn draw_polygon(ops: &mut Vec<Operation>, layout: &LocationLayout, page_height: f64) {
    if layout.polygon.points.is_empty() {
        return;
    }

    ops.push(Operation::new("q", vec![]));
    ops.push(Operation::new(
        "RG",
        vec![POLYGON_STROKE.0.into(), POLYGON_STROKE.1.into(), POLYGON_STROKE.2.into()],
    ));
    ops.push(Operation::new("w", vec![1.5.into()]));

    let first = flip_y(layout.polygon.points[0], page_height);
    ops.push(Operation::new("m", vec![first.x.into(), first.y.into()]));
    for point in &layout.polygon.points[1..] {
        let p = flip_y(*point, page_height);
        ops.push(Operation::new("l", vec![p.x.into(), p.y.into()]));
    }
    ops.push(Operation::new("h", vec![]));
    ops.push(Operation::new("S", vec![]));
    ops.push(Operation::new("Q", vec![]));

    let centroid = flip_y(layout.polygon.centroid(), page_height);
    ops.push(Operation::new("BT", vec![]));
    ops.push(Operation::new("Tf", vec!["Helvetica".into(), label_font_size(&layout.polygon).into()]));
    ops.push(Operation::new(
        "Td",
        vec![(centroid.x - layout.label.len() as f64 * 3.0).into(), centroid.y.into()],
    ));
    ops.push(Operation::new("Tj", vec![Object::string_literal(layout.label.clone())]));
    ops.push(Operation::new("ET", vec![]));
}

/// Font size sized to fit the polygon's bounding box with 10% padding,
/// capped at 24pt (§4.8 step 1).
fn label_font_size(polygon: &LocationPolygon) -> f64 {
    let (min_x, min_y, max_x, max_y) = polygon.bounds();
    let width = (max_x - min_x) * 0.9;
    let height = (max_y - min_y) * 0.9;
    width.min(height).min(24.0).max(6.0)
}

fn draw_leader_line(ops: &mut Vec<Operation>, badge: &PlacedBadge, page_height: f64) {
    let from = flip_y(badge.centroid, page_height);
    let to = flip_y(badge.left_edge_center(), page_height);

    ops.push(Operation::new("q", vec![]));
    ops.push(Operation::new("gs", vec!["LeaderShadow".into()]));
    ops.push(Operation::new("RG", vec![0.0.into(), 0.0.into(), 0.0.into()]));
    ops.push(Operation::new("w", vec![0.75.into()]));
    ops.push(Operation::new(
        "m",
        vec![(from.x + LEADER_SHADOW_OFFSET).into(), (from.y - LEADER_SHADOW_OFFSET).into()],
    ));
    ops.push(Operation::new(
        "l",
        vec![(to.x + LEADER_SHADOW_OFFSET).into(), (to.y - LEADER_SHADOW_OFFSET).into()],
    ));
    ops.push(Operation::new("S", vec![]));
    ops.push(Operation::new("Q", vec![]));

    ops.push(Operation::new("q", vec![]));
    ops.push(Operation::new("RG", vec![0.2.into(), 0.2.into(), 0.2.into()]));
    ops.push(Operation::new("w", vec![0.75.into()]));
    ops.push(Operation::new("m", vec![from.x.into(), from.y.into()]));
    ops.push(Operation::new("l", vec![to.x.into(), to.y.into()]));
    ops.push(Operation::new("S", vec![]));
    ops.push(Operation::new("Q", vec![]));

    draw_circle(ops, from, 2.0);
}

fn draw_circle(ops: &mut Vec<Operation>, center: Point, radius: f64) {
    // Approximated as an octagon: cheap and visually indistinguishable at
    // badge scale, and keeps the content stream to straight-line operators.
    const SIDES: usize = 8;
    ops.push(Operation::new("q", vec![]));
    ops.push(Operation::new("rg", vec![0.1.into(), 0.1.into(), 0.1.into()]));
    let first = (center.x + radius, center.y);
    ops.push(Operation::new("m", vec![first.0.into(), first.1.into()]));
    for i in 1..=SIDES {
        let angle = std::f64::consts::TAU * (i as f64) / (SIDES as f64);
        let point = (center.x + radius * angle.cos(), center.y + radius * angle.sin());
        ops.push(Operation::new("l", vec![point.0.into(), point.1.into()]));
    }
    ops.push(Operation::new("f", vec![]));
    ops.push(Operation::new("Q", vec![]));
}

fn draw_badge(ops: &mut Vec<Operation>, badge: &PlacedBadge, page_height: f64) {
    let top_left = flip_y(Point { x: badge.x, y: badge.y }, page_height);
    let y_origin = top_left.y - badge.height;

    ops.push(Operation::new("q", vec![]));
    ops.push(Operation::new("rg", vec![0.12.into(), 0.14.into(), 0.18.into()]));
    ops.push(Operation::new(
        "re",
        vec![top_left.x.into(), y_origin.into(), badge.width.into(), badge.height.into()],
    ));
    ops.push(Operation::new("f", vec![]));
    ops.push(Operation::new("Q", vec![]));

    let (r, g, b) = device_type_color(badge.device_type);
    ops.push(Operation::new("q", vec![]));
    ops.push(Operation::new("rg", vec![r.into(), g.into(), b.into()]));
    ops.push(Operation::new(
        "re",
        vec![top_left.x.into(), (y_origin + badge.height - ROW_HEIGHT).into(), badge.width.into(), ROW_HEIGHT.into()],
    ));
    ops.push(Operation::new("f", vec![]));
    ops.push(Operation::new("Q", vec![]));

    ops.push(Operation::new("q", vec![]));
    ops.push(Operation::new("RG", vec![1.0.into(), 1.0.into(), 1.0.into()]));
    ops.push(Operation::new("w", vec![0.5.into()]));
    for (i, row) in badge.rows.iter().enumerate() {
        let row_y = y_origin + badge.height - ROW_HEIGHT * (i as f64 + 2.0);
        ops.push(Operation::new("m", vec![top_left.x.into(), (row_y + ROW_HEIGHT).into()]));
        ops.push(Operation::new("l", vec![(top_left.x + badge.width).into(), (row_y + ROW_HEIGHT).into()]));
        ops.push(Operation::new("S", vec![]));

        ops.push(Operation::new("BT", vec![]));
        ops.push(Operation::new("rg", vec![0.95.into(), 0.95.into(), 0.95.into()]));
        ops.push(Operation::new("Tf", vec!["Helvetica".into(), 9.0.into()]));
        ops.push(Operation::new("Td", vec![(top_left.x + 6.0).into(), (row_y + 4.0).into()]));
        ops.push(Operation::new("Tj", vec![Object::string_literal(row.clone())]));
        ops.push(Operation::new("ET", vec![]));
    }
    ops.push(Operation::new("Q", vec![]));
}

/// PDF color per device type (§4.8 step 2 "icon cell colored by device
/// type").
fn device_type_color(device_type: DeviceType) -> (f32, f32, f32) {
    match device_type {
        DeviceType::Router => (0.96, 0.62, 0.04),
        DeviceType::Switch => (0.23, 0.51, 0.96),
        DeviceType::AccessPoint => (0.06, 0.73, 0.51),
        DeviceType::EndDevice => (0.55, 0.55, 0.58),
    }
}

/// lopdf's page coordinate origin is bottom-left, matching ours, but our
/// `Point::y` is treated as "distance down from the top" throughout
/// `layout` for readability; this flips it back to PDF space at the last
/// possible moment.
fn flip_y(point: Point, page_height: f64) -> Point {
    Point { x: point.x, y: page_height - point.y }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::device::Device;

    fn make_device(mac: &str) -> Device {
        Device {
            primary_mac: mac.to_string(),
            network_id: "net-1".to_string(),
            hostname: None,
            ip: "10.0.0.1".to_string(),
            vendor: Some("MikroTik".to_string()),
            model: Some("RB5009".to_string()),
            serial: Some("ABC123".to_string()),
            firmware_version: None,
            device_type: "router".to_string(),
            accessible: true,
            open_ports: sqlx::types::Json(Vec::new()),
            driver: None,
            parent_interface_id: None,
            upstream_interface: None,
            comment: None,
            nomad: false,
            skip_login: false,
            user_type: None,
            asset_tag: Some("AT-1".to_string()),
            location_id: None,
        }
    }

    fn make_polygon() -> LocationPolygon {
        LocationPolygon {
            id: "loc-poly-1".to_string(),
            floorplan_id: "fp-1".to_string(),
            location_id: "loc-1".to_string(),
            points: vec![
                Point { x: 0.0, y: 0.0 },
                Point { x: 100.0, y: 0.0 },
                Point { x: 100.0, y: 100.0 },
                Point { x: 0.0, y: 100.0 },
            ],
        }
    }

    #[test]
    fn test_single_badge_has_no_overlap() {
        let polygon = make_polygon();
        let devices = vec![make_device("AA:BB:CC:DD:EE:01")];
        let badges = layout(&polygon, &devices, true, 800.0, 600.0);
        assert_eq!(badges.len(), 1);
    }

    #[test]
    fn test_two_badges_do_not_overlap_after_relaxation() {
        let polygon = make_polygon();
        let devices = vec![make_device("AA:BB:CC:DD:EE:01"), make_device("AA:BB:CC:DD:EE:02")];
        let badges = layout(&polygon, &devices, true, 800.0, 600.0);
        assert_eq!(badges.len(), 2);
        assert!(!badges[0].overlaps(&badges[1]));
    }

    #[test]
    fn test_badges_stay_within_page_bounds() {
        let polygon = LocationPolygon {
            points: vec![
                Point { x: 750.0, y: 550.0 },
                Point { x: 790.0, y: 550.0 },
                Point { x: 790.0, y: 590.0 },
                Point { x: 750.0, y: 590.0 },
            ],
            ..make_polygon()
        };
        let devices = vec![make_device("AA:BB:CC:DD:EE:01")];
        let badges = layout(&polygon, &devices, true, 800.0, 600.0);
        for badge in &badges {
            assert!(badge.x >= 0.0 && badge.x + badge.width <= 800.0 + 0.001);
            assert!(badge.y >= 0.0 && badge.y + badge.height <= 600.0 + 0.001);
        }
    }

    #[test]
    fn test_segments_cross_detects_intersection() {
        let p1 = Point { x: 0.0, y: 0.0 };
        let p2 = Point { x: 10.0, y: 10.0 };
        let p3 = Point { x: 0.0, y: 10.0 };
        let p4 = Point { x: 10.0, y: 0.0 };
        assert!(segments_cross(p1, p2, p3, p4));
    }

    #[test]
    fn test_segments_cross_ignores_shared_endpoint() {
        let p1 = Point { x: 0.0, y: 0.0 };
        let p2 = Point { x: 10.0, y: 10.0 };
        let p3 = Point { x: 10.0, y: 10.0 };
        let p4 = Point { x: 20.0, y: 0.0 };
        assert!(!segments_cross(p1, p2, p3, p4));
    }
}
