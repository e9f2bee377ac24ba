fn main() {
    // Stamp the library build date for voxel3d::read_lib_build_date().
    let build_date = chrono::Utc::now().format("%Y-%m-%d").to_string();
    println!("cargo:rustc-env=VOXEL3D_BUILD_DATE={}", build_date);
}
