//! Builders for bit-exact synthetic parameter sets and slices.

// Each integration-test binary uses its own subset of these.
#![allow(dead_code)]

/// MSB-first bit assembler; the inverse of the crate's cursor, kept here
/// so test streams are readable field lists instead of opaque hex.
pub struct BitWriter {
    bits: Vec<bool>,
}

impl BitWriter {
    pub fn new() -> BitWriter {
        BitWriter { bits: Vec::new() }
    }

    pub fn put(&mut self, n: u32, v: u32) {
        for i in (0..n).rev() {
            self.bits.push((v >> i) & 1 == 1);
        }
    }

    pub fn put_flag(&mut self, b: bool) {
        self.bits.push(b);
    }

    pub fn put_ueg(&mut self, v: u32) {
        let code = u64::from(v) + 1;
        let len = 64 - code.leading_zeros();
        for _ in 0..len - 1 {
            self.bits.push(false);
        }
        for i in (0..len).rev() {
            self.bits.push((code >> i) & 1 == 1);
        }
    }

    /// Appends `rbsp_trailing_bits` (stop bit plus alignment) and packs.
    pub fn finish_rbsp(mut self) -> Vec<u8> {
        self.bits.push(true);
        while self.bits.len() % 8 != 0 {
            self.bits.push(false);
        }
        let mut out = Vec::with_capacity(self.bits.len() / 8);
        for chunk in self.bits.chunks(8) {
            let mut b = 0u8;
            for &bit in chunk {
                b = (b << 1) | bit as u8;
            }
            out.push(b);
        }
        out
    }
}

/// Inserts emulation-prevention bytes.
pub fn escape(rbsp: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(rbsp.len());
    let mut zeros = 0u32;
    for &b in rbsp {
        if zeros >= 2 && b <= 3 {
            out.push(3);
            zeros = 0;
        }
        if b == 0 {
            zeros += 1;
        } else {
            zeros = 0;
        }
        out.push(b);
    }
    out
}

/// A complete Annex B NAL unit: 4-byte start code, header, escaped RBSP.
pub fn nal(header: &[u8], rbsp: &[u8]) -> Vec<u8> {
    let mut out = vec![0, 0, 0, 1];
    out.extend_from_slice(header);
    out.extend_from_slice(&escape(rbsp));
    out
}

/// Baseline-profile H.264 SPS: `width_mbs*16` x `height_map_units*16`,
/// poc type 2, 4-bit frame_num, optional VUI timing.
pub fn h264_sps_rbsp(width_mbs: u32, height_map_units: u32, timing: Option<(u32, u32)>) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.put(8, 66); // profile_idc
    w.put(8, 0); // constraint flags + reserved
    w.put(8, 30); // level_idc
    w.put_ueg(0); // seq_parameter_set_id
    w.put_ueg(0); // log2_max_frame_num_minus4
    w.put_ueg(2); // pic_order_cnt_type
    w.put_ueg(1); // max_num_ref_frames
    w.put_flag(false); // gaps_in_frame_num_value_allowed_flag
    w.put_ueg(width_mbs - 1);
    w.put_ueg(height_map_units - 1);
    w.put_flag(true); // frame_mbs_only_flag
    w.put_flag(true); // direct_8x8_inference_flag
    w.put_flag(false); // frame_cropping_flag
    match timing {
        Some((num_units, time_scale)) => {
            w.put_flag(true); // vui_parameters_present_flag
            w.put_flag(false); // aspect_ratio_info_present_flag
            w.put_flag(false); // overscan_info_present_flag
            w.put_flag(false); // video_signal_type_present_flag
            w.put_flag(false); // chroma_loc_info_present_flag
            w.put_flag(true); // timing_info_present_flag
            w.put(32, num_units);
            w.put(32, time_scale);
            w.put_flag(true); // fixed_frame_rate_flag
        }
        None => w.put_flag(false),
    }
    w.finish_rbsp()
}

/// Minimal H.264 PPS referencing sps 0 with CAVLC and no extra POC fields.
pub fn h264_pps_rbsp() -> Vec<u8> {
    let mut w = BitWriter::new();
    w.put_ueg(0); // pic_parameter_set_id
    w.put_ueg(0); // seq_parameter_set_id
    w.put_flag(false); // entropy_coding_mode_flag
    w.put_flag(false); // bottom_field_pic_order_in_frame_present_flag
    w.put_ueg(0); // num_slice_groups_minus1
    w.finish_rbsp()
}

/// Slice header for the SPS/PPS above (4-bit frame_num, poc type 2).
pub fn h264_slice_rbsp(slice_type: u32, frame_num: u32, idr_pic_id: Option<u32>) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.put_ueg(0); // first_mb_in_slice
    w.put_ueg(slice_type);
    w.put_ueg(0); // pic_parameter_set_id
    w.put(4, frame_num);
    if let Some(id) = idr_pic_id {
        w.put_ueg(id);
    }
    // A few stand-in slice-data bits.
    w.put(8, 0xd5);
    w.finish_rbsp()
}

/// Main-profile H.265 SPS at the given luma dimensions, level 4.1,
/// optional VUI timing.
pub fn h265_sps_rbsp(width: u32, height: u32, timing: Option<(u32, u32)>) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.put(4, 0); // sps_video_parameter_set_id
    w.put(3, 0); // sps_max_sub_layers_minus1
    w.put_flag(true); // sps_temporal_id_nesting_flag
    // profile_tier_level: main profile, main tier.
    w.put(2, 0); // general_profile_space
    w.put_flag(false); // general_tier_flag
    w.put(5, 1); // general_profile_idc
    w.put(32, 0x6000_0000); // general_profile_compatibility_flag
    w.put_flag(true); // general_progressive_source_flag
    w.put_flag(false); // general_interlaced_source_flag
    w.put(2, 0); // non_packed + frame_only constraint flags
    w.put(32, 0); // reserved
    w.put(12, 0); // reserved
    w.put(8, 123); // general_level_idc (level 4.1)
    w.put_ueg(0); // sps_seq_parameter_set_id
    w.put_ueg(1); // chroma_format_idc
    w.put_ueg(width);
    w.put_ueg(height);
    w.put_flag(false); // conformance_window_flag
    w.put_ueg(0); // bit_depth_luma_minus8
    w.put_ueg(0); // bit_depth_chroma_minus8
    w.put_ueg(4); // log2_max_pic_order_cnt_lsb_minus4
    w.put_flag(false); // sps_sub_layer_ordering_info_present_flag
    w.put_ueg(4); // sps_max_dec_pic_buffering_minus1
    w.put_ueg(2); // sps_max_num_reorder_pics
    w.put_ueg(0); // sps_max_latency_increase_plus1
    w.put_ueg(0); // log2_min_luma_coding_block_size_minus3
    w.put_ueg(3); // log2_diff_max_min_luma_coding_block_size
    w.put_ueg(0); // log2_min_luma_transform_block_size_minus2
    w.put_ueg(3); // log2_diff_max_min_luma_transform_block_size
    w.put_ueg(0); // max_transform_hierarchy_depth_inter
    w.put_ueg(0); // max_transform_hierarchy_depth_intra
    w.put_flag(false); // scaling_list_enabled_flag
    w.put_flag(false); // amp_enabled_flag
    w.put_flag(true); // sample_adaptive_offset_enabled_flag
    w.put_flag(false); // pcm_enabled_flag
    w.put_ueg(0); // num_short_term_ref_pic_sets
    w.put_flag(false); // long_term_ref_pics_present_flag
    w.put_flag(true); // sps_temporal_mvp_enabled_flag
    w.put_flag(true); // strong_intra_smoothing_enabled_flag
    match timing {
        Some((num_units, time_scale)) => {
            w.put_flag(true); // vui_parameters_present_flag
            w.put_flag(false); // aspect_ratio_info_present_flag
            w.put_flag(false); // overscan_info_present_flag
            w.put_flag(false); // video_signal_type_present_flag
            w.put_flag(false); // chroma_loc_info_present_flag
            w.put(3, 0); // neutral_chroma + field_seq + frame_field_info
            w.put_flag(false); // default_display_window_flag
            w.put_flag(true); // vui_timing_info_present_flag
            w.put(32, num_units);
            w.put(32, time_scale);
        }
        None => w.put_flag(false),
    }
    w.finish_rbsp()
}

/// Two-byte HEVC NAL header for layer 0, temporal id 0.
pub fn h265_nal_header(nal_type: u8) -> [u8; 2] {
    [nal_type << 1, 0x01]
}

/// HEVC slice-segment header prefix plus stand-in slice data.
pub fn h265_slice_rbsp(nal_type: u8, first_slice: bool) -> Vec<u8> {
    let mut w = BitWriter::new();
    w.put_flag(first_slice);
    if (16..=23).contains(&nal_type) {
        w.put_flag(false); // no_output_of_prior_pics_flag
    }
    w.put_ueg(0); // slice_pic_parameter_set_id
    w.put(8, 0xd5);
    w.finish_rbsp()
}
