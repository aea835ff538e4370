use nestfs::io::FileBlockEmulatorBuilder;
use nestfs::FileSystem;

pub fn main() {
    let tmp = tempfile::tempfile().unwrap();
    let dev = FileBlockEmulatorBuilder::from(tmp)
        .with_sector_count(1024)
        .build()
        .expect("Could not initialize disk emulator.");

    // Lay a fresh file system onto the device and build a small tree.
    let mut fs = FileSystem::format(dev).expect("should format");
    fs.create("/a.txt", 100).unwrap();
    fs.create_directory("/d").unwrap();
    fs.create("/d/b.txt", 5000).unwrap();

    let file = fs.open("/d/b.txt").unwrap();
    fs.write_at(&file, b"hello from a level 2 file", 4000).unwrap();

    let listing = fs.list("/", true).unwrap();
    println!("{}", nestfs::render_listing(&listing, true));
    println!("{}", fs.dump().unwrap());
}
