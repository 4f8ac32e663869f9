use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{ExtractError, Result};
use crate::models::{camera_model_by_id, camera_model_by_name, Camera, Image, Point2D, Point3D};

// Little-endian fixed-width primitives shared by the binary readers/writers.

fn read_u8<R: Read>(reader: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_i32<R: Read>(reader: &mut R) -> Result<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_f64<R: Read>(reader: &mut R) -> Result<f64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

/// Reads bytes up to a NUL terminator; the file-name encoding is treated as
/// UTF-8 with lossy fallback.
fn read_cstring<R: Read>(reader: &mut R) -> Result<String> {
    let mut bytes = Vec::new();
    loop {
        let byte = read_u8(reader)?;
        if byte == 0 {
            break;
        }
        bytes.push(byte);
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

// ---------------------------------------------------------------------------
// Cameras

pub fn write_cameras_binary<W: Write>(writer: &mut W, cameras: &[Camera]) -> Result<()> {
    writer.write_all(&(cameras.len() as u64).to_le_bytes())?;
    for camera in cameras {
        writer.write_all(&camera.identifier.to_le_bytes())?;
        writer.write_all(&camera.model.model_id.to_le_bytes())?;
        writer.write_all(&camera.width.to_le_bytes())?;
        writer.write_all(&camera.height.to_le_bytes())?;
        for param in &camera.params {
            writer.write_all(&param.to_le_bytes())?;
        }
    }
    Ok(())
}

pub fn read_cameras_binary<R: Read>(reader: &mut R) -> Result<Vec<Camera>> {
    let count = read_u64(reader)?;
    let mut cameras = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let identifier = read_u32(reader)?;
        let model = camera_model_by_id(read_i32(reader)?)?;
        let width = read_u64(reader)?;
        let height = read_u64(reader)?;
        let mut params = Vec::with_capacity(model.num_params);
        for _ in 0..model.num_params {
            params.push(read_f64(reader)?);
        }
        cameras.push(Camera::new(identifier, model, width, height, params)?);
    }
    Ok(cameras)
}

/// One whitespace-delimited line per camera:
/// `id model_name width height params...`. Lines starting with `#` are
/// skipped on read.
pub fn write_cameras_text<W: Write>(writer: &mut W, cameras: &[Camera]) -> Result<()> {
    for camera in cameras {
        write!(
            writer,
            "{} {} {} {}",
            camera.identifier, camera.model.model_name, camera.width, camera.height
        )?;
        for param in &camera.params {
            write!(writer, " {param}")?;
        }
        writeln!(writer)?;
    }
    Ok(())
}

pub fn read_cameras_text<R: BufRead>(reader: R) -> Result<Vec<Camera>> {
    let mut cameras = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let identifier = next_field(&mut parts, "camera id")?;
        let model = camera_model_by_name(parts.next().ok_or_else(|| missing("model name"))?)?;
        let width = next_field(&mut parts, "camera width")?;
        let height = next_field(&mut parts, "camera height")?;
        let params = parts
            .map(|p| {
                p.parse::<f64>()
                    .map_err(|_| ExtractError::MalformedInput(format!("bad camera param: {p:?}")))
            })
            .collect::<Result<Vec<f64>>>()?;
        cameras.push(Camera::new(identifier, model, width, height, params)?);
    }
    Ok(cameras)
}

// ---------------------------------------------------------------------------
// Images

pub fn write_images_binary<W: Write>(writer: &mut W, images: &[Image]) -> Result<()> {
    writer.write_all(&(images.len() as u64).to_le_bytes())?;
    for image in images {
        writer.write_all(&image.identifier.to_le_bytes())?;
        for q in &image.r_quat {
            writer.write_all(&q.to_le_bytes())?;
        }
        for t in &image.t_vec {
            writer.write_all(&t.to_le_bytes())?;
        }
        writer.write_all(&image.camera_id.to_le_bytes())?;
        writer.write_all(image.name.as_bytes())?;
        writer.write_all(&[0u8])?;
        writer.write_all(&(image.points2d.len() as u64).to_le_bytes())?;
        for point in &image.points2d {
            writer.write_all(&point.x.to_le_bytes())?;
            writer.write_all(&point.y.to_le_bytes())?;
            writer.write_all(&point.point3d_id.to_le_bytes())?;
        }
    }
    Ok(())
}

pub fn read_images_binary<R: Read>(reader: &mut R) -> Result<Vec<Image>> {
    let count = read_u64(reader)?;
    let mut images = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let identifier = read_u32(reader)?;
        let mut r_quat = [0.0; 4];
        for q in &mut r_quat {
            *q = read_f64(reader)?;
        }
        let mut t_vec = [0.0; 3];
        for t in &mut t_vec {
            *t = read_f64(reader)?;
        }
        let camera_id = read_u32(reader)?;
        let name = read_cstring(reader)?;
        let num_points = read_u64(reader)?;
        let mut points2d = Vec::with_capacity(num_points as usize);
        for _ in 0..num_points {
            let x = read_f64(reader)?;
            let y = read_f64(reader)?;
            let point3d_id = read_u64(reader)?;
            points2d.push(Point2D::new(x, y, point3d_id));
        }
        images.push(Image::new(identifier, r_quat, t_vec, camera_id, name, points2d));
    }
    Ok(images)
}

/// Two lines per image: the pose line
/// `id qw qx qy qz tx ty tz camera_id name`, then the observation line of
/// `x y point3d_id` triples (blank when the image has no observations).
/// Reader and writer share this triple order; it is an internal convention
/// of this codec, not a public guarantee.
pub fn write_images_text<W: Write>(writer: &mut W, images: &[Image]) -> Result<()> {
    for image in images {
        write!(writer, "{}", image.identifier)?;
        for q in &image.r_quat {
            write!(writer, " {q}")?;
        }
        for t in &image.t_vec {
            write!(writer, " {t}")?;
        }
        writeln!(writer, " {} {}", image.camera_id, image.name)?;

        let mut first = true;
        for point in &image.points2d {
            if !first {
                write!(writer, " ")?;
            }
            write!(writer, "{} {} {}", point.x, point.y, point.point3d_id)?;
            first = false;
        }
        writeln!(writer)?;
    }
    Ok(())
}

pub fn read_images_text<R: BufRead>(reader: R) -> Result<Vec<Image>> {
    let mut images = Vec::new();
    let mut pending: Option<Image> = None;
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.starts_with('#') {
            continue;
        }
        match pending.take() {
            None => {
                if line.is_empty() {
                    continue;
                }
                let mut parts = line.split_whitespace();
                let identifier = next_field(&mut parts, "image id")?;
                let mut r_quat = [0.0; 4];
                for q in &mut r_quat {
                    *q = next_field(&mut parts, "quaternion component")?;
                }
                let mut t_vec = [0.0; 3];
                for t in &mut t_vec {
                    *t = next_field(&mut parts, "translation component")?;
                }
                let camera_id = next_field(&mut parts, "camera id")?;
                let name = parts
                    .next()
                    .ok_or_else(|| missing("image name"))?
                    .to_string();
                pending = Some(Image::new(identifier, r_quat, t_vec, camera_id, name, Vec::new()));
            }
            Some(mut image) => {
                let parts: Vec<&str> = line.split_whitespace().collect();
                if parts.len() % 3 != 0 {
                    return Err(ExtractError::MalformedInput(format!(
                        "image {}: observation line is not x/y/id triples",
                        image.identifier
                    )));
                }
                for triple in parts.chunks(3) {
                    let x = parse_field(triple[0], "observation x")?;
                    let y = parse_field(triple[1], "observation y")?;
                    let point3d_id = parse_field(triple[2], "observation point3d id")?;
                    image.points2d.push(Point2D::new(x, y, point3d_id));
                }
                images.push(image);
            }
        }
    }
    // A trailing pose line without its observation line is structural damage.
    if let Some(image) = pending {
        return Err(ExtractError::MalformedInput(format!(
            "image {}: missing observation line",
            image.identifier
        )));
    }
    Ok(images)
}

// ---------------------------------------------------------------------------
// Points3D

pub fn write_points3d_binary<W: Write>(writer: &mut W, points: &[Point3D]) -> Result<()> {
    writer.write_all(&(points.len() as u64).to_le_bytes())?;
    for point in points {
        writer.write_all(&point.identifier.to_le_bytes())?;
        for c in &point.xyz {
            writer.write_all(&c.to_le_bytes())?;
        }
        writer.write_all(&point.rgb)?;
        writer.write_all(&point.error.to_le_bytes())?;
        writer.write_all(&(point.track_len() as u64).to_le_bytes())?;
        for (image_id, point2d_idx) in point.image_ids.iter().zip(&point.point2d_idxs) {
            writer.write_all(&image_id.to_le_bytes())?;
            writer.write_all(&point2d_idx.to_le_bytes())?;
        }
    }
    Ok(())
}

pub fn read_points3d_binary<R: Read>(reader: &mut R) -> Result<Vec<Point3D>> {
    let count = read_u64(reader)?;
    let mut points = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let identifier = read_u64(reader)?;
        let mut xyz = [0.0; 3];
        for c in &mut xyz {
            *c = read_f64(reader)?;
        }
        let mut rgb = [0u8; 3];
        reader.read_exact(&mut rgb)?;
        let error = read_f64(reader)?;
        let track_len = read_u64(reader)?;
        let mut image_ids = Vec::with_capacity(track_len as usize);
        let mut point2d_idxs = Vec::with_capacity(track_len as usize);
        for _ in 0..track_len {
            image_ids.push(read_u32(reader)?);
            point2d_idxs.push(read_u32(reader)?);
        }
        points.push(Point3D::new(identifier, xyz, rgb, error, image_ids, point2d_idxs)?);
    }
    Ok(points)
}

/// One line per point:
/// `id x y z r g b error image_id point2d_idx ...` with the track flattened
/// as `image_id point2d_idx` pairs. Reader and writer share this pair order.
pub fn write_points3d_text<W: Write>(writer: &mut W, points: &[Point3D]) -> Result<()> {
    for point in points {
        write!(
            writer,
            "{} {} {} {} {} {} {} {}",
            point.identifier,
            point.xyz[0],
            point.xyz[1],
            point.xyz[2],
            point.rgb[0],
            point.rgb[1],
            point.rgb[2],
            point.error
        )?;
        for (image_id, point2d_idx) in point.image_ids.iter().zip(&point.point2d_idxs) {
            write!(writer, " {image_id} {point2d_idx}")?;
        }
        writeln!(writer)?;
    }
    Ok(())
}

pub fn read_points3d_text<R: BufRead>(reader: R) -> Result<Vec<Point3D>> {
    let mut points = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let identifier = next_field(&mut parts, "point id")?;
        let mut xyz = [0.0; 3];
        for c in &mut xyz {
            *c = next_field(&mut parts, "point coordinate")?;
        }
        let mut rgb = [0u8; 3];
        for c in &mut rgb {
            *c = next_field(&mut parts, "point color")?;
        }
        let error = next_field(&mut parts, "point error")?;

        let track: Vec<&str> = parts.collect();
        if track.len() % 2 != 0 {
            return Err(ExtractError::FormatMismatch(format!(
                "point {identifier}: track is not image/index pairs"
            )));
        }
        let mut image_ids = Vec::with_capacity(track.len() / 2);
        let mut point2d_idxs = Vec::with_capacity(track.len() / 2);
        for pair in track.chunks(2) {
            image_ids.push(parse_field(pair[0], "track image id")?);
            point2d_idxs.push(parse_field(pair[1], "track point2d index")?);
        }
        points.push(Point3D::new(identifier, xyz, rgb, error, image_ids, point2d_idxs)?);
    }
    Ok(points)
}

// ---------------------------------------------------------------------------
// Path-level entry points, dispatching on the file extension.

fn is_binary_path(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "bin")
}

pub fn read_cameras<P: AsRef<Path>>(path: P) -> Result<Vec<Camera>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    if is_binary_path(path) {
        read_cameras_binary(&mut BufReader::new(file))
    } else {
        read_cameras_text(BufReader::new(file))
    }
}

pub fn write_cameras<P: AsRef<Path>>(path: P, cameras: &[Camera]) -> Result<()> {
    let path = path.as_ref();
    let mut writer = BufWriter::new(File::create(path)?);
    if is_binary_path(path) {
        write_cameras_binary(&mut writer, cameras)?;
    } else {
        write_cameras_text(&mut writer, cameras)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_images<P: AsRef<Path>>(path: P) -> Result<Vec<Image>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    if is_binary_path(path) {
        read_images_binary(&mut BufReader::new(file))
    } else {
        read_images_text(BufReader::new(file))
    }
}

pub fn write_images<P: AsRef<Path>>(path: P, images: &[Image]) -> Result<()> {
    let path = path.as_ref();
    let mut writer = BufWriter::new(File::create(path)?);
    if is_binary_path(path) {
        write_images_binary(&mut writer, images)?;
    } else {
        write_images_text(&mut writer, images)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_points3d<P: AsRef<Path>>(path: P) -> Result<Vec<Point3D>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    if is_binary_path(path) {
        read_points3d_binary(&mut BufReader::new(file))
    } else {
        read_points3d_text(BufReader::new(file))
    }
}

pub fn write_points3d<P: AsRef<Path>>(path: P, points: &[Point3D]) -> Result<()> {
    let path = path.as_ref();
    let mut writer = BufWriter::new(File::create(path)?);
    if is_binary_path(path) {
        write_points3d_binary(&mut writer, points)?;
    } else {
        write_points3d_text(&mut writer, points)?;
    }
    writer.flush()?;
    Ok(())
}

fn missing(what: &str) -> ExtractError {
    ExtractError::MalformedInput(format!("missing {what}"))
}

fn parse_field<T: std::str::FromStr>(raw: &str, what: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| ExtractError::MalformedInput(format!("bad {what}: {raw:?}")))
}

fn next_field<'a, T, I>(parts: &mut I, what: &str) -> Result<T>
where
    T: std::str::FromStr,
    I: Iterator<Item = &'a str>,
{
    parse_field(parts.next().ok_or_else(|| missing(what))?, what)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{camera_model_by_name, INVALID_POINT3D_ID};
    use std::io::Cursor;

    fn sample_cameras() -> Vec<Camera> {
        vec![
            Camera::new(
                1,
                camera_model_by_name("OPENCV").unwrap(),
                3840,
                2160,
                vec![2900.5, 2900.5, 1920.0, 1080.0, 0.01, -0.002, 0.0001, 0.0],
            )
            .unwrap(),
            Camera::new(
                2,
                camera_model_by_name("SIMPLE_PINHOLE").unwrap(),
                640,
                480,
                vec![525.0, 320.0, 240.0],
            )
            .unwrap(),
        ]
    }

    fn sample_images() -> Vec<Image> {
        vec![
            Image::new(
                0,
                [0.9238795, 0.0, 0.3826834, 0.0],
                [12.5, -3.25, 110.0],
                1,
                "0_0_0.png".to_string(),
                vec![
                    Point2D::new(100.5, 200.25, 7),
                    Point2D::new(50.0, 60.0, INVALID_POINT3D_ID),
                ],
            ),
            Image::new(
                1,
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 0.0, 0.0],
                1,
                "0_1_3.png".to_string(),
                Vec::new(),
            ),
        ]
    }

    fn sample_points() -> Vec<Point3D> {
        vec![
            Point3D::new(
                11,
                [1.5, -2.25, 3.125],
                [200, 100, 50],
                0.75,
                vec![0, 1],
                vec![0, 4],
            )
            .unwrap(),
            Point3D::new(12, [0.0, 0.0, 1.0], [0, 0, 0], 0.0, Vec::new(), Vec::new()).unwrap(),
        ]
    }

    #[test]
    fn test_cameras_binary_round_trip() {
        for cameras in [sample_cameras(), Vec::new()] {
            let mut buf = Vec::new();
            write_cameras_binary(&mut buf, &cameras).unwrap();
            let decoded = read_cameras_binary(&mut Cursor::new(buf)).unwrap();
            assert_eq!(decoded, cameras);
        }
    }

    #[test]
    fn test_cameras_text_round_trip() {
        for cameras in [sample_cameras(), Vec::new()] {
            let mut buf = Vec::new();
            write_cameras_text(&mut buf, &cameras).unwrap();
            let decoded = read_cameras_text(Cursor::new(buf)).unwrap();
            assert_eq!(decoded, cameras);
        }
    }

    #[test]
    fn test_images_binary_round_trip() {
        for images in [sample_images(), Vec::new()] {
            let mut buf = Vec::new();
            write_images_binary(&mut buf, &images).unwrap();
            let decoded = read_images_binary(&mut Cursor::new(buf)).unwrap();
            assert_eq!(decoded, images);
        }
    }

    #[test]
    fn test_images_text_round_trip() {
        for images in [sample_images(), Vec::new()] {
            let mut buf = Vec::new();
            write_images_text(&mut buf, &images).unwrap();
            let decoded = read_images_text(Cursor::new(buf)).unwrap();
            assert_eq!(decoded, images);
        }
    }

    #[test]
    fn test_points3d_binary_round_trip() {
        for points in [sample_points(), Vec::new()] {
            let mut buf = Vec::new();
            write_points3d_binary(&mut buf, &points).unwrap();
            let decoded = read_points3d_binary(&mut Cursor::new(buf)).unwrap();
            assert_eq!(decoded, points);
        }
    }

    #[test]
    fn test_points3d_text_round_trip() {
        for points in [sample_points(), Vec::new()] {
            let mut buf = Vec::new();
            write_points3d_text(&mut buf, &points).unwrap();
            let decoded = read_points3d_text(Cursor::new(buf)).unwrap();
            assert_eq!(decoded, points);
        }
    }

    #[test]
    fn test_binary_camera_layout_is_fixed() {
        let cameras = vec![Camera::new(
            3,
            camera_model_by_name("SIMPLE_PINHOLE").unwrap(),
            640,
            480,
            vec![1.0, 2.0, 3.0],
        )
        .unwrap()];
        let mut buf = Vec::new();
        write_cameras_binary(&mut buf, &cameras).unwrap();
        // u64 count + u32 id + i32 model + 2 * u64 + 3 * f64
        assert_eq!(buf.len(), 8 + 4 + 4 + 16 + 24);
        assert_eq!(&buf[..8], &1u64.to_le_bytes());
        assert_eq!(&buf[8..12], &3u32.to_le_bytes());
        assert_eq!(&buf[12..16], &0i32.to_le_bytes());
    }

    #[test]
    fn test_unknown_model_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u64.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&42i32.to_le_bytes()); // not a model id
        buf.extend_from_slice(&640u64.to_le_bytes());
        buf.extend_from_slice(&480u64.to_le_bytes());
        assert!(matches!(
            read_cameras_binary(&mut Cursor::new(buf)),
            Err(ExtractError::UnsupportedModel(_))
        ));
    }

    #[test]
    fn test_comment_lines_skipped() {
        let text = "# cameras list\n1 PINHOLE 100 100 1 2 3 4\n";
        let cameras = read_cameras_text(Cursor::new(text)).unwrap();
        assert_eq!(cameras.len(), 1);
        assert_eq!(cameras[0].model.model_name, "PINHOLE");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        assert!(matches!(
            read_cameras("/nonexistent/cameras.bin"),
            Err(ExtractError::Io(_))
        ));
    }
}
