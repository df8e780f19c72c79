use ndarray::ArrayViewMut2;

/// A vertex in pixel index space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelVertex {
    pub row: i64,
    pub col: i64,
}

impl PixelVertex {
    pub fn new(row: i64, col: i64) -> Self {
        Self { row, col }
    }
}

/// Set every pixel of `plane` covered by the closed polygon, boundary included.
///
/// The interior is filled with an even-odd scanline rule evaluated at integer row centers,
/// and every edge is then drawn with a Bresenham line. Vertices may lie outside the plane, even
/// at `i64::MAX`; edges are clipped to the plane first so the work is bounded by the plane size.
pub fn fill_polygon(plane: &mut ArrayViewMut2<u8>, vertices: &[PixelVertex]) {
    if vertices.is_empty() {
        return;
    }
    fill_interior(plane, vertices);
    for (start, end) in edges(vertices) {
        draw_line(plane, start, end);
    }
}

fn edges(vertices: &[PixelVertex]) -> impl Iterator<Item = (PixelVertex, PixelVertex)> + '_ {
    vertices
        .iter()
        .copied()
        .zip(vertices.iter().copied().cycle().skip(1))
}

fn fill_interior(plane: &mut ArrayViewMut2<u8>, vertices: &[PixelVertex]) {
    let (rows, cols) = plane.dim();
    if rows == 0 || cols == 0 {
        return;
    }
    let min_row = vertices.iter().map(|v| v.row).min().unwrap_or(0).max(0);
    let max_row = vertices
        .iter()
        .map(|v| v.row)
        .max()
        .unwrap_or(-1)
        .min(rows as i64 - 1);

    let mut crossings: Vec<f64> = Vec::with_capacity(vertices.len());
    for row in min_row..=max_row {
        crossings.clear();
        for (a, b) in edges(vertices) {
            // Half-open on the row range so a vertex shared by two edges is counted once
            let (top, bottom) = if a.row <= b.row { (a, b) } else { (b, a) };
            if top.row == bottom.row || row < top.row || row >= bottom.row {
                continue;
            }
            // Floating point so that distant vertices cannot overflow
            let t = (row as f64 - top.row as f64) / (bottom.row as f64 - top.row as f64);
            crossings.push(top.col as f64 + t * (bottom.col as f64 - top.col as f64));
        }
        crossings.sort_by(f64::total_cmp);

        for span in crossings.chunks_exact(2) {
            let start = span[0].ceil().max(0.0);
            let end = span[1].floor().min(cols as f64 - 1.0);
            if start > end {
                continue;
            }
            plane
                .row_mut(row as usize)
                .slice_mut(ndarray::s![start as usize..=end as usize])
                .fill(1);
        }
    }
}

/// Liang-Barsky clipping of a segment to the pixel centers of a `rows` x `cols` plane.
/// Returns `None` when no part of the segment lies on the plane.
fn clip_to_plane(
    start: PixelVertex,
    end: PixelVertex,
    rows: i64,
    cols: i64,
) -> Option<(PixelVertex, PixelVertex)> {
    let inside = |v: PixelVertex| (0..rows).contains(&v.row) && (0..cols).contains(&v.col);
    if inside(start) && inside(end) {
        return Some((start, end));
    }

    let (r0, c0) = (start.row as f64, start.col as f64);
    let (dr, dc) = (end.row as f64 - r0, end.col as f64 - c0);
    let (max_row, max_col) = ((rows - 1) as f64, (cols - 1) as f64);
    let (mut t0, mut t1) = (0.0_f64, 1.0_f64);
    for (p, q) in [(-dr, r0), (dr, max_row - r0), (-dc, c0), (dc, max_col - c0)] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let t = q / p;
        if p < 0.0 {
            t0 = t0.max(t);
        } else {
            t1 = t1.min(t);
        }
        if t0 > t1 {
            return None;
        }
    }

    let at = |t: f64, original: PixelVertex| {
        if inside(original) && (t == 0.0 || t == 1.0) {
            return original;
        }
        let row = (r0 + t * dr).round().clamp(0.0, max_row) as i64;
        let col = (c0 + t * dc).round().clamp(0.0, max_col) as i64;
        PixelVertex::new(row, col)
    };
    Some((at(t0, start), at(t1, end)))
}

fn draw_line(plane: &mut ArrayViewMut2<u8>, start: PixelVertex, end: PixelVertex) {
    let (rows, cols) = plane.dim();
    if rows == 0 || cols == 0 {
        return;
    }
    let Some((start, end)) = clip_to_plane(start, end, rows as i64, cols as i64) else {
        return;
    };

    let d_row = (end.row - start.row).abs();
    let d_col = -(end.col - start.col).abs();
    let step_row = if start.row < end.row { 1 } else { -1 };
    let step_col = if start.col < end.col { 1 } else { -1 };
    let mut error = d_row + d_col;
    let (mut row, mut col) = (start.row, start.col);

    loop {
        plane[[row as usize, col as usize]] = 1;
        if row == end.row && col == end.col {
            break;
        }
        let doubled = 2 * error;
        if doubled >= d_col {
            error += d_col;
            row += step_row;
        }
        if doubled <= d_row {
            error += d_row;
            col += step_col;
        }
    }
}
