// SPDX-License-Identifier: CEPL-1.0
//! Sierpinski subdivision of colored triangles.

use lumen_render_vk::Vertex;

/// Top, right, left; red, green, blue.
pub fn base_triangle() -> [Vertex; 3] {
    [
        Vertex::new([0.0, -0.5, 0.0], [1.0, 0.0, 0.0, 1.0]),
        Vertex::new([0.5, 0.5, 0.0], [0.0, 1.0, 0.0, 1.0]),
        Vertex::new([-0.5, 0.5, 0.0], [0.0, 0.0, 1.0, 1.0]),
    ]
}

fn midpoint(a: &Vertex, b: &Vertex) -> Vertex {
    let mut out = Vertex::default();
    for i in 0..3 {
        out.position[i] = (a.position[i] + b.position[i]) * 0.5;
    }
    for i in 0..4 {
        out.color[i] = (a.color[i] + b.color[i]) * 0.5;
    }
    out
}

/// Splits one `(top, right, left)` triangle into its three corner triangles.
fn subdivide(top: &Vertex, right: &Vertex, left: &Vertex) -> [Vertex; 9] {
    let top_right = midpoint(top, right);
    let right_left = midpoint(right, left);
    let left_top = midpoint(left, top);
    [
        *top, top_right, left_top,
        top_right, *right, right_left,
        left_top, right_left, *left,
    ]
}

/// Subdivides every complete triangle in `triangles` `depth` times.
/// Fewer than three vertices yield nothing; a trailing partial triangle
/// is dropped.
pub fn sierpinski(depth: u32, triangles: &[Vertex]) -> Vec<Vertex> {
    let mut current: Vec<Vertex> = triangles
        .chunks_exact(3)
        .flatten()
        .copied()
        .collect();
    for _ in 0..depth {
        current = current
            .chunks_exact(3)
            .flat_map(|tri| subdivide(&tri[0], &tri[1], &tri[2]))
            .collect();
    }
    current
}
