/// Benchmarks for GeoTIFF encoding and decoding.
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mosaicist::geotiff;
use mosaicist::models::DType;
use mosaicist::raster::{
    CoordinateReference, GeoMetadata, GeoTransform, RasterGrid, NODATA_SENTINEL,
};
use ndarray::Array2;

fn criterion_benchmark(c: &mut Criterion) {
    for size in [64, 256, 1024] {
        for dtype in [DType::Uint16, DType::Float32, DType::Float64] {
            let grid = RasterGrid::new(
                Array2::from_shape_fn((size, size), |(row, col)| ((row * 31 + col) % 1000) as f64),
                GeoMetadata {
                    transform: GeoTransform::new(-90.0, 16.0, 0.05, -0.05),
                    crs: Some(CoordinateReference::WGS84),
                    dtype,
                    nodata: Some(NODATA_SENTINEL),
                },
            );
            let encoded = geotiff::encode(&grid).unwrap();
            c.bench_function(&format!("encode({}x{}, {})", size, size, dtype), |b| {
                b.iter(|| geotiff::encode(black_box(&grid)).unwrap())
            });
            c.bench_function(&format!("decode({}x{}, {})", size, size, dtype), |b| {
                b.iter(|| geotiff::decode(black_box(&encoded)).unwrap())
            });
        }
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
