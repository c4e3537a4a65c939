// based on https://sotrh.github.io/learn-wgpu/intermediate/tutorial12-camera/#cleaning-up-lib-rs

use cgmath::*;

pub trait Camera {
    fn view_matrix(&self) -> Matrix4<f32>;
    fn proj_matrix(&self) -> Matrix4<f32>;
}

#[derive(Debug, Clone, Copy)]
pub struct PerspectiveCamera {
    pub position: Point3<f32>,
    pub yaw: Rad<f32>,
    pub pitch: Rad<f32>,
    pub projection: PerspectiveProjection,
}

impl PerspectiveCamera {
    pub fn new(
        pos: Point3<f32>,
        yaw: Rad<f32>,
        pitch: Rad<f32>,
        projection: PerspectiveProjection,
    ) -> Self {
        PerspectiveCamera {
            position: pos,
            yaw,
            pitch,
            projection,
        }
    }
}

impl Default for PerspectiveCamera {
    fn default() -> Self {
        Self {
            position: Point3::new(0., 0., -1.),
            yaw: Rad::zero(),
            pitch: Rad::zero(),
            projection: PerspectiveProjection {
                aspect: 1.,
                fovy: Deg(45.).into(),
                znear: 0.1,
                zfar: 100.,
            },
        }
    }
}

impl Camera for PerspectiveCamera {
    fn view_matrix(&self) -> Matrix4<f32> {
        let (sin_pitch, cos_pitch) = self.pitch.0.sin_cos();
        let (sin_yaw, cos_yaw) = self.yaw.0.sin_cos();

        Matrix4::look_to_rh(
            self.position,
            Vector3::new(cos_pitch * cos_yaw, sin_pitch, cos_pitch * sin_yaw).normalize(),
            Vector3::unit_y(),
        )
    }

    fn proj_matrix(&self) -> Matrix4<f32> {
        self.projection.projection_matrix()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PerspectiveProjection {
    pub aspect: f32,
    pub fovy: Rad<f32>,
    pub znear: f32,
    pub zfar: f32,
}

/// see https://sotrh.github.io/learn-wgpu/intermediate/tutorial12-camera/#the-camera
#[rustfmt::skip]
pub const OPENGL_TO_WGPU_MATRIX: cgmath::Matrix4<f32> = cgmath::Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, -1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
);

impl PerspectiveProjection {
    pub fn new<F: Into<Rad<f32>>>(aspect: f32, fovy: F, znear: f32, zfar: f32) -> Self {
        Self {
            aspect,
            fovy: fovy.into(),
            znear,
            zfar,
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.aspect = width as f32 / height as f32;
    }

    pub fn projection_matrix(&self) -> Matrix4<f32> {
        perspective(self.fovy, self.aspect, self.znear, self.zfar)
    }

    /// focal lengths in pixels for the given viewport
    pub fn focal(&self, viewport: Vector2<u32>) -> Vector2<f32> {
        let tan_half_fovy = (self.fovy / 2.).tan();
        let fy = viewport.y as f32 / (2. * tan_half_fovy);
        let fx = viewport.x as f32 / (2. * tan_half_fovy * self.aspect);
        Vector2::new(fx, fy)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SimpleCamera {
    pub view: Matrix4<f32>,
    pub projection: Matrix4<f32>,
}

impl SimpleCamera {
    pub fn new(view: Matrix4<f32>, projection: Matrix4<f32>) -> Self {
        Self { view, projection }
    }
}

impl Camera for SimpleCamera {
    fn view_matrix(&self) -> Matrix4<f32> {
        self.view
    }

    fn proj_matrix(&self) -> Matrix4<f32> {
        self.projection
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn focal_matches_fov() {
        let proj = PerspectiveProjection::new(2., Deg(90.), 0.1, 100.);
        let focal = proj.focal(Vector2::new(1600, 800));
        // tan(45°) == 1, so fy is half the viewport height
        assert!((focal.y - 400.).abs() < 1e-3);
        assert!((focal.x - 400.).abs() < 1e-3);
    }

    #[test]
    fn resize_updates_aspect() {
        let mut proj = PerspectiveProjection::new(1., Deg(60.), 0.1, 100.);
        proj.resize(200, 100);
        assert_eq!(proj.aspect, 2.);
    }
}
