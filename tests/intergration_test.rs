use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use npk_tool::{
    DeflateWrapper, Diagnostic, EditOptions, FrameDescriptor, ImgFrame, NpkBuilder, NpkEditor,
    NpkError, NpkPath, NpkReader, PixelFormat, PixelFrame, ReadOptions,
    format::IMG_MAGIC,
};
use tempfile::tempdir;

fn pixel_frame(format: PixelFormat, width: u32, height: u32, compressed: bool) -> PixelFrame {
    PixelFrame {
        format,
        compressed,
        compressed_length: 0,
        width,
        height,
        location_x: 7,
        location_y: 9,
        max_width: 800,
        max_height: 600,
    }
}

fn raw_pixels(frame: &PixelFrame, seed: u8) -> Vec<u8> {
    (0..frame.raw_len().unwrap())
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

fn img_frame(format: PixelFormat, width: u32, height: u32, compressed: bool, seed: u8) -> ImgFrame {
    let frame = pixel_frame(format, width, height, compressed);
    let pixels = raw_pixels(&frame, seed);
    ImgFrame::pixels(frame, pixels)
}

fn write_archive(dir: &Path, name: &str, builder: &NpkBuilder) -> PathBuf {
    let path = dir.join(name);
    builder.write_file(&path).unwrap();
    path
}

fn bgra_to_rgba(raw: &[u8]) -> Vec<u8> {
    raw.chunks(4)
        .flat_map(|px| [px[2], px[1], px[0], px[3]])
        .collect()
}

fn header_field1(archive: &Path, reader: &NpkReader, img: &str) -> u32 {
    let entry = reader
        .entries()
        .into_iter()
        .find(|e| e.name == img)
        .unwrap();
    let bytes = fs::read(archive).unwrap();
    let at = entry.location.offset as usize + 16;
    u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
}

#[test]
fn test_sprite_and_sound_archive() {
    let temp_dir = tempdir().unwrap();
    let frame = img_frame(PixelFormat::EightEightEightEight, 2, 2, false, 1);
    let raw = frame.pixels.clone();

    let mut builder = NpkBuilder::new();
    builder
        .add_img(&NpkPath::new("a.img"), &[frame])
        .unwrap()
        .add_sound(&NpkPath::new("b.wav"), b"RIFF....WAVE".to_vec())
        .unwrap();
    let path = write_archive(temp_dir.path(), "test.npk", &builder);

    let mut reader = NpkReader::open(&path).unwrap();
    let images: Vec<&NpkPath> = reader.sprite_paths().collect();
    assert_eq!(images, [&NpkPath::new("a.img")]);
    assert_eq!(reader.sound_paths().count(), 1);

    let image = reader.get_image(&NpkPath::new("a.img"), 0).unwrap();
    assert_eq!(image.pixels.len(), 16);
    assert_eq!(image.pixels, bgra_to_rgba(&raw));
    assert_eq!((image.attributes.location_x, image.attributes.location_y), (7, 9));

    assert_eq!(reader.read_sound(&NpkPath::new("B.WAV")).unwrap(), b"RIFF....WAVE");
    assert!(
        reader
            .read_sound(&NpkPath::new("a.img"))
            .unwrap_err()
            .is_not_found()
    );
}

#[test]
fn test_lookup_is_case_and_separator_insensitive() {
    let temp_dir = tempdir().unwrap();
    let mut builder = NpkBuilder::new();
    builder
        .add_img(
            &NpkPath::new("Interface/Emoticon/Against.img"),
            &[img_frame(PixelFormat::FourFourFourFour, 3, 1, true, 0)],
        )
        .unwrap();
    let path = write_archive(temp_dir.path(), "sprite_Interface_Emoticon.npk", &builder);

    let mut reader = NpkReader::open(&path).unwrap();
    let key = NpkPath::new("\\interface\\EMOTICON//against.IMG");
    assert!(reader.contains_img(&key));
    assert!(!reader.is_loaded(&key));
    assert_eq!(reader.frames(&key).unwrap().len(), 1);
    assert!(reader.is_loaded(&NpkPath::new("Interface/Emoticon/Against.img")));
    assert_eq!(key.image_npk_name(), "sprite_interface_EMOTICON.npk");
}

#[test]
fn test_link_frame_decodes_like_its_target() {
    let temp_dir = tempdir().unwrap();
    let mut builder = NpkBuilder::new();
    builder
        .add_img(
            &NpkPath::new("linked.img"),
            &[
                img_frame(PixelFormat::OneFiveFiveFive, 5, 3, true, 3),
                ImgFrame::link(0),
            ],
        )
        .unwrap();
    let path = write_archive(temp_dir.path(), "test.npk", &builder);

    let mut reader = NpkReader::open(&path).unwrap();
    let img = NpkPath::new("linked.img");
    let target = reader.get_image(&img, 0).unwrap();
    let link = reader.get_image(&img, 1).unwrap();
    assert_eq!(link.pixels, target.pixels);
    assert_eq!(link.attributes, target.attributes);
    assert_eq!(link.pixels.len(), 5 * 3 * 4);
}

#[test]
fn test_zlib_wrapped_frames_are_readable() {
    let temp_dir = tempdir().unwrap();
    let frame = img_frame(PixelFormat::EightEightEightEight, 8, 8, true, 5);
    let raw = frame.pixels.clone();
    let mut builder = NpkBuilder::new().with_deflate(DeflateWrapper::Zlib);
    builder.add_img(&NpkPath::new("z.img"), &[frame]).unwrap();
    let path = write_archive(temp_dir.path(), "test.npk", &builder);

    let mut reader = NpkReader::open(&path).unwrap();
    let image = reader.get_image(&NpkPath::new("z.img"), 0).unwrap();
    assert_eq!(image.pixels, bgra_to_rgba(&raw));
}

#[test]
fn test_missing_things_are_not_found() {
    let temp_dir = tempdir().unwrap();
    let err = NpkReader::open(temp_dir.path().join("nope.npk")).unwrap_err();
    assert!(matches!(err, NpkError::NotFound(_)));
    assert!(err.is_not_found());

    let mut builder = NpkBuilder::new();
    builder
        .add_img(
            &NpkPath::new("a.img"),
            &[img_frame(PixelFormat::FourFourFourFour, 1, 1, false, 0)],
        )
        .unwrap();
    let path = write_archive(temp_dir.path(), "test.npk", &builder);
    let mut reader = NpkReader::open(&path).unwrap();

    let err = reader.get_image(&NpkPath::new("b.img"), 0).unwrap_err();
    assert!(matches!(err, NpkError::ImgNotFound(_)));
    let err = reader.get_image(&NpkPath::new("a.img"), 1).unwrap_err();
    assert!(matches!(err, NpkError::FrameNotFound { index: 1, count: 1, .. }));
    assert!(err.is_not_found());
}

#[test]
fn test_truncated_header_is_malformed() {
    let temp_dir = tempdir().unwrap();
    let mut builder = NpkBuilder::new();
    builder
        .add_sound(&NpkPath::new("b.wav"), vec![0; 32])
        .unwrap();
    let path = write_archive(temp_dir.path(), "test.npk", &builder);

    let bytes = fs::read(&path).unwrap();
    fs::write(&path, &bytes[..10]).unwrap();
    let err = NpkReader::open(&path).unwrap_err();
    assert!(err.is_malformed(), "{err}");

    // table cut short
    fs::write(&path, &bytes[..100]).unwrap();
    assert!(NpkReader::open(&path).unwrap_err().is_malformed());

    fs::write(&path, b"NeoplePack_Bilx\0\0\0\0\0").unwrap();
    assert!(matches!(
        NpkReader::open(&path).unwrap_err(),
        NpkError::InvalidFormat(_)
    ));
}

#[test]
fn test_unclassified_entries_are_skipped() {
    let temp_dir = tempdir().unwrap();
    let mut builder = NpkBuilder::new();
    builder
        .add_raw("readme.txt", b"hello".to_vec())
        .unwrap()
        .add_sound(&NpkPath::new("b.wav"), vec![1, 2])
        .unwrap();
    let path = write_archive(temp_dir.path(), "test.npk", &builder);

    let reader = NpkReader::open(&path).unwrap();
    assert_eq!(reader.entries().len(), 1);
    assert_eq!(reader.sprite_paths().count(), 0);
}

/// A one-frame img whose metadata claims `stored_len` payload bytes.
fn single_frame_img(frame: PixelFrame, stored_len: u32, payload: &[u8]) -> Vec<u8> {
    let mut img = IMG_MAGIC.to_vec();
    for v in [36, 0, 2, 1] {
        img.extend_from_slice(&u32::to_le_bytes(v));
    }
    FrameDescriptor::Pixels(frame)
        .write_to(&mut img, stored_len)
        .unwrap();
    img.extend_from_slice(payload);
    img
}

fn single_img_archive(dir: &Path, img: Vec<u8>) -> PathBuf {
    let mut builder = NpkBuilder::new();
    builder.add_raw("sprite/x.img", img).unwrap();
    write_archive(dir, "test.npk", &builder)
}

#[test]
fn test_oversized_frames_are_malformed() {
    let temp_dir = tempdir().unwrap();
    let img = NpkPath::new("x.img");
    let packed = npk_tool::pixels::deflate(&[0; 4], DeflateWrapper::Raw).unwrap();

    let uncompressed = pixel_frame(PixelFormat::EightEightEightEight, 1 << 31, 1 << 31, false);
    let compressed = pixel_frame(PixelFormat::EightEightEightEight, 1 << 31, 1 << 30, true);
    for (frame, payload) in [(uncompressed, &[0u8; 4][..]), (compressed, packed.as_slice())] {
        let path = single_img_archive(
            temp_dir.path(),
            single_frame_img(frame, payload.len() as u32, payload),
        );
        let mut reader = NpkReader::open(&path).unwrap();
        let err = reader.get_image(&img, 0).unwrap_err();
        assert!(matches!(err, NpkError::InvalidFormat(_)), "{err}");
    }

    // fits in 32 bits but the stream holds almost nothing
    let large = pixel_frame(PixelFormat::EightEightEightEight, 32768, 32767, true);
    let path = single_img_archive(
        temp_dir.path(),
        single_frame_img(large, packed.len() as u32, &packed),
    );
    let mut reader = NpkReader::open(&path).unwrap();
    let err = reader.get_image(&img, 0).unwrap_err();
    assert!(matches!(err, NpkError::PixelSize { actual: 4, .. }), "{err}");
}

#[test]
fn test_payload_past_end_of_file_is_truncated() {
    let temp_dir = tempdir().unwrap();
    let frame = pixel_frame(PixelFormat::EightEightEightEight, 1, 1, true);
    let path = single_img_archive(
        temp_dir.path(),
        single_frame_img(frame, u32::MAX, &[0; 4]),
    );

    let mut reader = NpkReader::open(&path).unwrap();
    let err = reader.get_image(&NpkPath::new("x.img"), 0).unwrap_err();
    assert!(matches!(err, NpkError::Truncated { .. }), "{err}");
    assert!(err.is_malformed());
}

/// frame 0 points nowhere, and the table claims three bytes past the payload
fn broken_img() -> Vec<u8> {
    let pixels = pixel_frame(PixelFormat::EightEightEightEight, 1, 1, false);
    let mut img = IMG_MAGIC.to_vec();
    for v in [36 + 8, 0, 2, 2] {
        img.extend_from_slice(&u32::to_le_bytes(v));
    }
    FrameDescriptor::Link { target_index: 5 }
        .write_to(&mut img, 0)
        .unwrap();
    FrameDescriptor::Pixels(pixels)
        .write_to(&mut img, 4)
        .unwrap();
    img.extend_from_slice(&[1, 2, 3, 4]);
    img.extend_from_slice(b"xyz");
    img
}

#[test]
fn test_strict_mode_reports_diagnostics() {
    let temp_dir = tempdir().unwrap();
    let mut builder = NpkBuilder::new();
    builder.add_raw("sprite/bad.img", broken_img()).unwrap();
    let path = write_archive(temp_dir.path(), "test.npk", &builder);
    let img = NpkPath::new("bad.img");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let options = ReadOptions::strict(move |d: &Diagnostic| sink.lock().unwrap().push(d.clone()));
    let mut reader = NpkReader::open_with(&path, options).unwrap();

    // diagnostics never fail the load
    reader.preload_all().unwrap();
    let seen = seen.lock().unwrap().clone();
    assert!(seen.iter().any(|d| matches!(
        d,
        Diagnostic::LinkOutOfRange {
            frame: 0,
            target: 5,
            count: 2,
            ..
        }
    )));
    assert!(seen.iter().any(|d| matches!(
        d,
        Diagnostic::SizeMismatch {
            declared: 83,
            computed: 80,
            ..
        }
    )));
    assert!(seen.iter().any(|d| matches!(d, Diagnostic::TrailingData { offset, .. } if *offset > 0)));

    // the frame that does have pixels still decodes
    assert_eq!(reader.get_image(&img, 1).unwrap().pixels.len(), 4);
    let err = reader.get_image(&img, 0).unwrap_err();
    assert!(matches!(err, NpkError::InvalidLink { target: 5, .. }));
    assert!(err.is_malformed());
}

#[test]
fn test_lenient_mode_reports_nothing() {
    let temp_dir = tempdir().unwrap();
    let mut builder = NpkBuilder::new();
    builder.add_raw("sprite/bad.img", broken_img()).unwrap();
    let path = write_archive(temp_dir.path(), "test.npk", &builder);

    let seen = Arc::new(Mutex::new(0usize));
    let sink = Arc::clone(&seen);
    let options = ReadOptions {
        strict: false,
        on_diagnostic: Some(Arc::new(move |_: &Diagnostic| *sink.lock().unwrap() += 1)),
    };
    let mut reader = NpkReader::open_with(&path, options).unwrap();
    reader.preload_img(&NpkPath::new("bad.img")).unwrap();
    assert_eq!(*seen.lock().unwrap(), 0);
}

#[test]
fn test_shrinking_edit() {
    let temp_dir = tempdir().unwrap();
    let mut builder = NpkBuilder::new();
    builder
        .add_img(
            &NpkPath::new("a.img"),
            &[img_frame(PixelFormat::EightEightEightEight, 4, 4, false, 0)],
        )
        .unwrap();
    let path = write_archive(temp_dir.path(), "test.npk", &builder);
    let len_before = fs::metadata(&path).unwrap().len();
    let size_before = NpkReader::open(&path).unwrap().entries()[0].location.size;

    let mut editor = NpkEditor::default();
    editor.open(&path).unwrap();
    let smaller = pixel_frame(PixelFormat::EightEightEightEight, 2, 2, false);
    editor
        .edit_frame(
            &NpkPath::new("a.img"),
            0,
            FrameDescriptor::Pixels(smaller),
            &[0u8; 16][..],
        )
        .unwrap();
    editor.close();

    let delta = 64 - 16;
    assert_eq!(fs::metadata(&path).unwrap().len(), len_before - delta);
    let reader = NpkReader::open(&path).unwrap();
    assert_eq!(reader.entries()[0].location.size, size_before - delta as u32);

    // nothing left behind next to the archive
    let names: Vec<_> = fs::read_dir(temp_dir.path()).unwrap().collect();
    assert_eq!(names.len(), 1);
}

#[test]
fn test_edit_round_trip() {
    for (compressed, wrapper) in [
        (false, DeflateWrapper::Raw),
        (true, DeflateWrapper::Raw),
        (true, DeflateWrapper::Zlib),
    ] {
        let temp_dir = tempdir().unwrap();
        let mut builder = NpkBuilder::new();
        builder
            .add_img(
                &NpkPath::new("a.img"),
                &[
                    img_frame(PixelFormat::OneFiveFiveFive, 3, 3, true, 1),
                    img_frame(PixelFormat::OneFiveFiveFive, 3, 3, false, 2),
                ],
            )
            .unwrap();
        let path = write_archive(temp_dir.path(), "test.npk", &builder);

        let replacement = pixel_frame(PixelFormat::EightEightEightEight, 6, 5, compressed);
        let raw = raw_pixels(&replacement, 42);

        let mut editor = NpkEditor::new(EditOptions { deflate: wrapper });
        editor.open(&path).unwrap();
        editor
            .edit_frame(
                &NpkPath::new("a.img"),
                1,
                FrameDescriptor::Pixels(replacement),
                raw.as_slice(),
            )
            .unwrap();

        // through the editor's refreshed reader and a fresh one
        let via_editor = editor.get_image(&NpkPath::new("a.img"), 1).unwrap();
        let mut reader = NpkReader::open(&path).unwrap();
        let image = reader.get_image(&NpkPath::new("a.img"), 1).unwrap();
        assert_eq!(image, via_editor);
        assert_eq!(image.pixels, bgra_to_rgba(&raw));
        assert_eq!(image.attributes.width, 6);
        assert_eq!(image.attributes.compressed, compressed);
    }
}

#[test]
fn test_edit_leaves_other_entries_alone() {
    let temp_dir = tempdir().unwrap();
    let mut builder = NpkBuilder::new();
    builder
        .add_img(
            &NpkPath::new("first.img"),
            &[img_frame(PixelFormat::FourFourFourFour, 4, 2, true, 1)],
        )
        .unwrap()
        .add_img(
            &NpkPath::new("edited.img"),
            &[
                img_frame(PixelFormat::EightEightEightEight, 2, 3, false, 2),
                img_frame(PixelFormat::OneFiveFiveFive, 5, 5, true, 3),
                ImgFrame::link(0),
                img_frame(PixelFormat::FourFourFourFour, 1, 7, false, 4),
            ],
        )
        .unwrap()
        .add_sound(&NpkPath::new("hit.wav"), b"not really a wav".to_vec())
        .unwrap()
        .add_raw("misc/notes", b"kept verbatim".to_vec())
        .unwrap()
        .add_img(
            &NpkPath::new("deep/last.img"),
            &[
                img_frame(PixelFormat::EightEightEightEight, 3, 3, true, 5),
                ImgFrame::link(0),
            ],
        )
        .unwrap();
    let path = write_archive(temp_dir.path(), "test.npk", &builder);

    let snapshot = |reader: &mut NpkReader| {
        let mut imgs: Vec<NpkPath> = reader.sprite_paths().cloned().collect();
        imgs.sort();
        let mut images = Vec::new();
        for img in imgs {
            let count = reader.frames(&img).unwrap().len();
            for i in 0..count {
                if img == "edited.img" && i == 1 {
                    continue;
                }
                images.push((img.clone(), i, reader.get_image(&img, i).unwrap()));
            }
        }
        let sound = reader.read_sound(&NpkPath::new("hit.wav")).unwrap();
        (images, sound)
    };

    let mut editor = NpkEditor::default();
    editor.open(&path).unwrap();
    let before = snapshot(editor.reader().unwrap());
    let bytes_before = fs::read(&path).unwrap();

    let bigger = pixel_frame(PixelFormat::EightEightEightEight, 9, 9, true);
    editor
        .edit_frame(
            &NpkPath::new("edited.img"),
            1,
            FrameDescriptor::Pixels(bigger),
            raw_pixels(&bigger, 99).as_slice(),
        )
        .unwrap();
    let after = snapshot(editor.reader().unwrap());
    assert_eq!(before, after);

    // the unclassified entry moved along with everything else
    let bytes_after = fs::read(&path).unwrap();
    assert_ne!(bytes_before.len(), bytes_after.len());
    let notes = b"kept verbatim";
    assert!(bytes_after.windows(notes.len()).any(|w| w == notes));
    assert_eq!(
        bytes_before[bytes_before.len() - 100..],
        bytes_after[bytes_after.len() - 100..]
    );
}

#[test]
fn test_link_edits_update_field1() {
    let temp_dir = tempdir().unwrap();
    let mut builder = NpkBuilder::new();
    builder
        .add_img(
            &NpkPath::new("a.img"),
            &[
                img_frame(PixelFormat::EightEightEightEight, 2, 2, false, 0),
                img_frame(PixelFormat::EightEightEightEight, 2, 2, true, 1),
                img_frame(PixelFormat::EightEightEightEight, 2, 2, false, 2),
            ],
        )
        .unwrap();
    let path = write_archive(temp_dir.path(), "test.npk", &builder);
    let img = NpkPath::new("a.img");

    let mut editor = NpkEditor::default();
    editor.open(&path).unwrap();
    assert_eq!(header_field1(&path, editor.reader().unwrap(), "a.img"), 3 * 36);

    // pixels -> link
    editor
        .edit_frame(&img, 2, FrameDescriptor::Link { target_index: 0 }, io::empty())
        .unwrap();
    assert_eq!(header_field1(&path, editor.reader().unwrap(), "a.img"), 2 * 36 + 8);
    assert_eq!(
        editor.get_image(&img, 2).unwrap(),
        editor.get_image(&img, 0).unwrap()
    );

    // link -> pixels
    let frame = pixel_frame(PixelFormat::FourFourFourFour, 1, 1, false);
    editor
        .edit_frame(&img, 2, FrameDescriptor::Pixels(frame), &[0x0F, 0xF0][..])
        .unwrap();
    assert_eq!(header_field1(&path, editor.reader().unwrap(), "a.img"), 3 * 36);
    assert_eq!(editor.get_image(&img, 2).unwrap().pixels, [0x00, 0x00, 0xFF, 0xFF]);

    let record = editor.reader().unwrap().get_or_load(&img).unwrap();
    assert_eq!(&record.header_fields()[1..], &[0, 2]);
    assert_eq!(record.link_count(), 0);
}

#[test]
fn test_rejected_edits_leave_the_archive_untouched() {
    let temp_dir = tempdir().unwrap();
    let mut builder = NpkBuilder::new();
    builder
        .add_img(
            &NpkPath::new("a.img"),
            &[
                img_frame(PixelFormat::EightEightEightEight, 2, 2, false, 0),
                ImgFrame::link(0),
            ],
        )
        .unwrap();
    let path = write_archive(temp_dir.path(), "test.npk", &builder);
    let bytes = fs::read(&path).unwrap();
    let img = NpkPath::new("a.img");

    let mut editor = NpkEditor::default();
    let err = editor
        .edit_frame(&img, 0, FrameDescriptor::Link { target_index: 1 }, io::empty())
        .unwrap_err();
    assert!(matches!(err, NpkError::NotOpen));
    assert!(err.is_usage());

    editor.open(&path).unwrap();
    // a link to a link
    let err = editor
        .edit_frame(&img, 0, FrameDescriptor::Link { target_index: 1 }, io::empty())
        .unwrap_err();
    assert!(err.is_usage());
    // out of range
    let err = editor
        .edit_frame(&img, 1, FrameDescriptor::Link { target_index: 8 }, io::empty())
        .unwrap_err();
    assert!(err.is_usage());
    // too few pixels
    let frame = pixel_frame(PixelFormat::EightEightEightEight, 2, 2, true);
    let err = editor
        .edit_frame(&img, 0, FrameDescriptor::Pixels(frame), &[0u8; 15][..])
        .unwrap_err();
    assert!(err.is_usage());
    let err = editor
        .edit_frame(&img, 2, FrameDescriptor::Pixels(frame), &[0u8; 16][..])
        .unwrap_err();
    assert!(matches!(err, NpkError::FrameNotFound { index: 2, .. }));

    // far too large to describe
    let huge = pixel_frame(PixelFormat::EightEightEightEight, 1 << 31, 1 << 30, false);
    let err = editor
        .edit_frame(&img, 0, FrameDescriptor::Pixels(huge), io::empty())
        .unwrap_err();
    assert!(err.is_usage());

    assert_eq!(fs::read(&path).unwrap(), bytes);
    assert!(editor.is_open());
}

#[test]
fn test_link_edits_keep_links_one_hop() {
    let temp_dir = tempdir().unwrap();
    let mut builder = NpkBuilder::new();
    builder
        .add_img(
            &NpkPath::new("a.img"),
            &[
                img_frame(PixelFormat::EightEightEightEight, 2, 2, false, 0),
                img_frame(PixelFormat::EightEightEightEight, 2, 2, false, 1),
                ImgFrame::link(0),
            ],
        )
        .unwrap();
    let path = write_archive(temp_dir.path(), "test.npk", &builder);
    let bytes = fs::read(&path).unwrap();
    let img = NpkPath::new("a.img");

    let mut editor = NpkEditor::default();
    editor.open(&path).unwrap();

    // frame 2 points at frame 0, so frame 0 has to keep its pixels
    let err = editor
        .edit_frame(&img, 0, FrameDescriptor::Link { target_index: 1 }, io::empty())
        .unwrap_err();
    assert!(matches!(&err, NpkError::InvalidArgument(m) if m.contains("cannot become a link")));

    let err = editor
        .edit_frame(&img, 1, FrameDescriptor::Link { target_index: 1 }, io::empty())
        .unwrap_err();
    assert!(matches!(&err, NpkError::InvalidArgument(m) if m.contains("link to itself")));

    assert_eq!(fs::read(&path).unwrap(), bytes);

    // a frame nobody links to may become a link
    editor
        .edit_frame(&img, 1, FrameDescriptor::Link { target_index: 0 }, io::empty())
        .unwrap();
    assert_eq!(
        editor.get_image(&img, 1).unwrap(),
        editor.get_image(&img, 0).unwrap()
    );
}

#[cfg(unix)]
#[test]
fn test_failed_replace_keeps_the_original() {
    let temp_dir = tempdir().unwrap();
    let mut builder = NpkBuilder::new();
    builder
        .add_img(
            &NpkPath::new("a.img"),
            &[img_frame(PixelFormat::EightEightEightEight, 2, 2, false, 0)],
        )
        .unwrap();
    let path = write_archive(temp_dir.path(), "test.npk", &builder);

    let img = NpkPath::new("a.img");
    let mut editor = NpkEditor::default();
    editor.open(&path).unwrap();
    editor.get_image(&img, 0).unwrap();

    // a non-empty directory where the archive was: the rename onto it fails
    // and so does reopening
    fs::remove_file(&path).unwrap();
    fs::create_dir(&path).unwrap();
    fs::write(path.join("keep"), b"x").unwrap();

    let frame = pixel_frame(PixelFormat::EightEightEightEight, 1, 1, false);
    let err = editor
        .edit_frame(&img, 0, FrameDescriptor::Pixels(frame), &[0u8; 4][..])
        .unwrap_err();
    assert!(matches!(err, NpkError::Persist { .. }), "{err}");
    assert!(!editor.is_open());
    assert!(path.join("keep").exists());

    // the temp file did not linger
    assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 1);
}
