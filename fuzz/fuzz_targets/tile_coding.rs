#![no_main]

use cros_decode_pipeline::codec::av1::Av1PicParams;
use cros_decode_pipeline::codec::av1::Av1TileParams;
use cros_decode_pipeline::decoder::av1::tile_coding::Av1TileCoding;
use libfuzzer_sys::fuzz_target;

fn read_u16(data: &[u8]) -> u16 {
    u16::from_le_bytes([data[0], data[1]])
}

fn read_u32(data: &[u8]) -> u32 {
    u32::from_le_bytes([data[0], data[1], data[2], data[3]])
}

fuzz_target!(|data: &[u8]| {
    if data.len() < 8 {
        return;
    }

    let mut pic = Av1PicParams {
        tile_cols: u16::from(data[0] % 66),
        tile_rows: u16::from(data[1] % 66),
        tile_count_minus1: u16::from(data[2]),
        ..Default::default()
    };
    pic.pic_info.large_scale_tile = data[3] & 1 != 0;
    let data_size = read_u32(&data[4..8]);

    let tiles: Vec<_> = data[8..]
        .chunks_exact(16)
        .map(|t| Av1TileParams {
            bs_tile_data_location: read_u32(&t[0..4]),
            bs_tile_bytes_in_buffer: read_u32(&t[4..8]),
            tile_row: u16::from(t[8]),
            tile_column: u16::from(t[9]),
            start_tile_idx: u16::from(t[10]),
            end_tile_idx: u16::from(t[11]),
            tile_index: read_u16(&t[12..14]),
            anchor_frame_idx: t[14],
        })
        .collect();

    let mut coding = Av1TileCoding::new();
    // Split the tiles over two calls to exercise the multi-call path.
    let (first, second) = tiles.split_at(tiles.len() / 2);
    for call in [first, second] {
        if coding.update(&pic, call, data_size).is_err() {
            return;
        }

        for tile in coding.tiles() {
            assert!(tile.size > 0);
            let end = u64::from(tile.offset) + u64::from(tile.size);
            assert!(end <= u64::from(data_size) || (tile.offset, tile.size) == (0, 4));
        }
        assert!(coding.is_complete());
    }
});
