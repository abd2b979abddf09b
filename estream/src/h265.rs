//! H.265/HEVC parameter-set and slice-segment-header parsing, to the
//! depth needed for access-unit boundary detection and
//! decoder-configuration extraction. Field names follow ITU-T H.265
//! section 7.3.

use fnv::FnvHashMap;

use crate::bits::BitCursor;
use crate::{Codec, ChromaFormat, DecoderConfig, Error, ScanType};

pub const NAL_VPS: u8 = 32;
pub const NAL_SPS: u8 = 33;
pub const NAL_PPS: u8 = 34;
pub const NAL_AUD: u8 = 35;
pub const NAL_SEI_PREFIX: u8 = 39;
pub const NAL_SEI_SUFFIX: u8 = 40;

/// True for NAL types reserved for slice data (Table 7-1 types 0-31).
pub fn is_vcl(nal_type: u8) -> bool {
    nal_type <= 31
}

/// True for the slice types this parser understands (TRAIL through CRA).
pub fn is_supported_slice(nal_type: u8) -> bool {
    nal_type <= 21
}

/// Intra-random-access-point pictures: BLA/IDR/CRA (types 16-21) plus the
/// two reserved IRAP types.
pub fn is_irap(nal_type: u8) -> bool {
    (16..=23).contains(&nal_type)
}

/// One short-term reference picture set: delta-POC lists with used flags,
/// negative (S0) then positive (S1).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShortTermRps {
    pub delta_poc_s0: Vec<i32>,
    pub used_s0: Vec<bool>,
    pub delta_poc_s1: Vec<i32>,
    pub used_s1: Vec<bool>,
}

impl ShortTermRps {
    pub fn num_delta_pocs(&self) -> usize {
        self.delta_poc_s0.len() + self.delta_poc_s1.len()
    }
}

/// Parses one `st_ref_pic_set(stRpsIdx)`; `prev` holds the sets already
/// parsed for this SPS (inter-RPS prediction references the previous one).
fn parse_short_term_rps(
    r: &mut BitCursor,
    idx: usize,
    prev: &[ShortTermRps],
) -> Result<ShortTermRps, Error> {
    let inter_pred = idx != 0 && r.read_flag();
    if !inter_pred {
        let num_negative = r.read_ueg();
        let num_positive = r.read_ueg();
        if num_negative > 16 || num_positive > 16 {
            return Err(Error::Parse("short-term RPS picture count out of range"));
        }
        let mut rps = ShortTermRps::default();
        let mut poc = 0i32;
        for _ in 0..num_negative {
            poc -= r.read_ueg().min(1 << 16) as i32 + 1;
            rps.delta_poc_s0.push(poc);
            rps.used_s0.push(r.read_flag());
        }
        poc = 0;
        for _ in 0..num_positive {
            poc += r.read_ueg().min(1 << 16) as i32 + 1;
            rps.delta_poc_s1.push(poc);
            rps.used_s1.push(r.read_flag());
        }
        return Ok(rps);
    }

    // Inter-RPS prediction (7.4.8): derive this set from the previous one.
    let reference = prev.last().ok_or(Error::Parse("inter-predicted RPS without a reference"))?;
    let delta_rps_sign = r.read_flag();
    let abs_delta_rps = r.read_ueg().min(1 << 16) as i32 + 1;
    let delta_rps = if delta_rps_sign { -abs_delta_rps } else { abs_delta_rps };
    let num_ref_deltas = reference.num_delta_pocs();
    let mut used = Vec::with_capacity(num_ref_deltas + 1);
    let mut use_delta = Vec::with_capacity(num_ref_deltas + 1);
    for _ in 0..=num_ref_deltas {
        let u = r.read_flag();
        used.push(u);
        use_delta.push(if u { true } else { r.read_flag() });
    }

    let num_neg = reference.delta_poc_s0.len();
    let mut rps = ShortTermRps::default();
    for j in (0..reference.delta_poc_s1.len()).rev() {
        let poc = reference.delta_poc_s1[j] + delta_rps;
        if poc < 0 && use_delta[num_neg + j] {
            rps.delta_poc_s0.push(poc);
            rps.used_s0.push(used[num_neg + j]);
        }
    }
    if delta_rps < 0 && use_delta[num_ref_deltas] {
        rps.delta_poc_s0.push(delta_rps);
        rps.used_s0.push(used[num_ref_deltas]);
    }
    for j in 0..num_neg {
        let poc = reference.delta_poc_s0[j] + delta_rps;
        if poc < 0 && use_delta[j] {
            rps.delta_poc_s0.push(poc);
            rps.used_s0.push(used[j]);
        }
    }
    for j in (0..num_neg).rev() {
        let poc = reference.delta_poc_s0[j] + delta_rps;
        if poc > 0 && use_delta[j] {
            rps.delta_poc_s1.push(poc);
            rps.used_s1.push(used[j]);
        }
    }
    if delta_rps > 0 && use_delta[num_ref_deltas] {
        rps.delta_poc_s1.push(delta_rps);
        rps.used_s1.push(used[num_ref_deltas]);
    }
    for j in 0..reference.delta_poc_s1.len() {
        let poc = reference.delta_poc_s1[j] + delta_rps;
        if poc > 0 && use_delta[num_neg + j] {
            rps.delta_poc_s1.push(poc);
            rps.used_s1.push(used[num_neg + j]);
        }
    }
    Ok(rps)
}

/// Skips a `scaling_list_data()` block (7.3.4).
fn skip_scaling_list_data(r: &mut BitCursor) {
    for size_id in 0..4u32 {
        let mut matrix_id = 0;
        while matrix_id < 6 {
            if !r.read_flag() {
                // scaling_list_pred_mode_flag == 0
                r.read_ueg(); // scaling_list_pred_matrix_id_delta
            } else {
                let coef_num = std::cmp::min(64, 1u32 << (4 + (size_id << 1)));
                if size_id > 1 {
                    r.read_seg(); // scaling_list_dc_coef_minus8
                }
                for _ in 0..coef_num {
                    r.read_seg(); // scaling_list_delta_coef
                }
            }
            matrix_id += if size_id == 3 { 3 } else { 1 };
        }
    }
}

/// The pieces of `profile_tier_level()` the configuration needs.
struct ProfileTierLevel {
    profile_space: u8,
    tier_flag: bool,
    profile_idc: u8,
    progressive_source_flag: bool,
    interlaced_source_flag: bool,
    level_idc: u8,
}

fn parse_profile_tier_level(r: &mut BitCursor, max_sub_layers_minus1: u32) -> ProfileTierLevel {
    let profile_space = r.read_u(2) as u8;
    let tier_flag = r.read_flag();
    let profile_idc = r.read_u(5) as u8;
    r.skip(32); // general_profile_compatibility_flag
    let progressive_source_flag = r.read_flag();
    let interlaced_source_flag = r.read_flag();
    r.skip(2); // non_packed + frame_only constraint flags
    r.skip(44); // reserved constraint bits + inbld
    let level_idc = r.read_u(8) as u8;

    let n = max_sub_layers_minus1 as usize;
    let mut profile_present = vec![false; n];
    let mut level_present = vec![false; n];
    for i in 0..n {
        profile_present[i] = r.read_flag();
        level_present[i] = r.read_flag();
    }
    if n > 0 {
        r.skip(2 * (8 - n)); // reserved_zero_2bits alignment
    }
    for i in 0..n {
        if profile_present[i] {
            r.skip(88);
        }
        if level_present[i] {
            r.skip(8);
        }
    }
    ProfileTierLevel {
        profile_space,
        tier_flag,
        profile_idc,
        progressive_source_flag,
        interlaced_source_flag,
        level_idc,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sps {
    pub profile_space: u8,
    pub tier_flag: bool,
    pub profile_idc: u8,
    /// `general_level_idc / 3`: tenths of the level number (123 -> 41).
    pub level: u8,
    pub progressive_source_flag: bool,
    pub interlaced_source_flag: bool,
    pub chroma_format_idc: u32,
    pub separate_colour_plane_flag: bool,
    /// Dimensions with the conformance window applied.
    pub width: u32,
    pub height: u32,
    pub bit_depth_luma: u8,
    pub log2_max_pic_order_cnt_lsb: u32,
    pub short_term_rps: Vec<ShortTermRps>,
    pub long_term_ref_pics_present_flag: bool,
    /// `(num_units_in_tick, time_scale)` from VUI, when present.
    pub timing: Option<(u32, u32)>,
}

impl Sps {
    /// Parses a `seq_parameter_set_rbsp`, returning the id and the record.
    pub fn parse(rbsp: &[u8]) -> Result<(u8, Sps), Error> {
        let mut r = BitCursor::new(rbsp);
        r.skip(4); // sps_video_parameter_set_id
        let max_sub_layers_minus1 = r.read_u(3);
        r.read_flag(); // sps_temporal_id_nesting_flag
        let ptl = parse_profile_tier_level(&mut r, max_sub_layers_minus1);

        let id = r.read_ueg();
        if id > 15 {
            return Err(Error::Parse("sps_seq_parameter_set_id out of range"));
        }
        let chroma_format_idc = r.read_ueg();
        if chroma_format_idc > 3 {
            return Err(Error::Parse("chroma_format_idc out of range"));
        }
        let separate_colour_plane_flag = chroma_format_idc == 3 && r.read_flag();
        let chroma_array_type = if separate_colour_plane_flag { 0 } else { chroma_format_idc };

        let mut width = r.read_ueg();
        let mut height = r.read_ueg();
        if width > 16384 || height > 16384 {
            return Err(Error::Parse("coded size out of range"));
        }
        if r.read_flag() {
            // conformance_window_flag
            let left = u64::from(r.read_ueg());
            let right = u64::from(r.read_ueg());
            let top = u64::from(r.read_ueg());
            let bottom = u64::from(r.read_ueg());
            let sub_w = if chroma_array_type == 1 || chroma_array_type == 2 { 2 } else { 1 };
            let sub_h = if chroma_array_type == 1 { 2 } else { 1 };
            width = width.saturating_sub((sub_w * (left + right)).min(u64::from(u32::MAX)) as u32);
            height = height.saturating_sub((sub_h * (top + bottom)).min(u64::from(u32::MAX)) as u32);
        }
        if width == 0 || height == 0 {
            return Err(Error::Parse("cropped dimensions are empty"));
        }

        let bit_depth_luma = 8 + r.read_ueg().min(8) as u8;
        r.read_ueg(); // bit_depth_chroma_minus8
        let log2_minus4 = r.read_ueg();
        if log2_minus4 > 12 {
            return Err(Error::Parse("log2_max_pic_order_cnt_lsb out of range"));
        }
        let log2_max_pic_order_cnt_lsb = 4 + log2_minus4;

        let ordering_info_present = r.read_flag();
        let start = if ordering_info_present { 0 } else { max_sub_layers_minus1 };
        for _ in start..=max_sub_layers_minus1 {
            r.read_ueg(); // sps_max_dec_pic_buffering_minus1
            r.read_ueg(); // sps_max_num_reorder_pics
            r.read_ueg(); // sps_max_latency_increase_plus1
        }

        r.read_ueg(); // log2_min_luma_coding_block_size_minus3
        r.read_ueg(); // log2_diff_max_min_luma_coding_block_size
        r.read_ueg(); // log2_min_luma_transform_block_size_minus2
        r.read_ueg(); // log2_diff_max_min_luma_transform_block_size
        r.read_ueg(); // max_transform_hierarchy_depth_inter
        r.read_ueg(); // max_transform_hierarchy_depth_intra

        if r.read_flag() {
            // scaling_list_enabled_flag
            if r.read_flag() {
                skip_scaling_list_data(&mut r);
            }
        }
        r.read_flag(); // amp_enabled_flag
        r.read_flag(); // sample_adaptive_offset_enabled_flag
        if r.read_flag() {
            // pcm_enabled_flag
            r.skip(8); // pcm sample bit depths
            r.read_ueg(); // log2_min_pcm_luma_coding_block_size_minus3
            r.read_ueg(); // log2_diff_max_min_pcm_luma_coding_block_size
            r.read_flag(); // pcm_loop_filter_disabled_flag
        }

        let num_short_term_rps = r.read_ueg();
        if num_short_term_rps > 64 {
            return Err(Error::Parse("num_short_term_ref_pic_sets out of range"));
        }
        let mut short_term_rps = Vec::with_capacity(num_short_term_rps as usize);
        for i in 0..num_short_term_rps as usize {
            let rps = parse_short_term_rps(&mut r, i, &short_term_rps)?;
            short_term_rps.push(rps);
        }

        let long_term_ref_pics_present_flag = r.read_flag();
        if long_term_ref_pics_present_flag {
            let count = r.read_ueg();
            if count > 32 {
                return Err(Error::Parse("num_long_term_ref_pics_sps out of range"));
            }
            for _ in 0..count {
                r.skip(log2_max_pic_order_cnt_lsb as usize); // lt_ref_pic_poc_lsb_sps
                r.read_flag(); // used_by_curr_pic_lt_sps_flag
            }
        }
        r.read_flag(); // sps_temporal_mvp_enabled_flag
        r.read_flag(); // strong_intra_smoothing_enabled_flag

        let mut timing = None;
        if r.read_flag() {
            // vui_parameters_present_flag
            timing = parse_vui_timing(&mut r);
        }

        Ok((
            id as u8,
            Sps {
                profile_space: ptl.profile_space,
                tier_flag: ptl.tier_flag,
                profile_idc: ptl.profile_idc,
                level: ptl.level_idc / 3,
                progressive_source_flag: ptl.progressive_source_flag,
                interlaced_source_flag: ptl.interlaced_source_flag,
                chroma_format_idc,
                separate_colour_plane_flag,
                width,
                height,
                bit_depth_luma,
                log2_max_pic_order_cnt_lsb,
                short_term_rps,
                long_term_ref_pics_present_flag,
                timing,
            },
        ))
    }

    pub fn decoder_config(&self) -> DecoderConfig {
        let (num, den) = match self.timing {
            Some((num_units, time_scale)) => {
                crate::reduce_fraction(u64::from(time_scale), u64::from(num_units))
            }
            None => (0, 0),
        };
        let chroma_array_type = if self.separate_colour_plane_flag {
            0
        } else {
            self.chroma_format_idc
        };
        DecoderConfig {
            codec: Codec::H265,
            profile: self.profile_idc,
            level: self.level,
            bit_depth: self.bit_depth_luma,
            width: self.width,
            height: self.height,
            chroma: ChromaFormat::from_idc(chroma_array_type),
            scan: if self.interlaced_source_flag {
                ScanType::Interlaced
            } else {
                ScanType::Progressive
            },
            frame_rate_num: num,
            frame_rate_den: den,
        }
    }
}

/// Walks the HEVC VUI prefix up to `vui_timing_info` (E.2.1) and returns
/// `(num_units_in_tick, time_scale)` when present and nonzero.
fn parse_vui_timing(r: &mut BitCursor) -> Option<(u32, u32)> {
    if r.read_flag() {
        // aspect_ratio_info_present_flag
        let idc = r.read_u(8);
        if idc == 255 {
            r.skip(32); // sar_width + sar_height
        }
    }
    if r.read_flag() {
        r.read_flag(); // overscan_appropriate_flag
    }
    if r.read_flag() {
        // video_signal_type_present_flag
        r.skip(4); // video_format + video_full_range_flag
        if r.read_flag() {
            r.skip(24); // colour_primaries, transfer, matrix
        }
    }
    if r.read_flag() {
        // chroma_loc_info_present_flag
        r.read_ueg();
        r.read_ueg();
    }
    r.skip(3); // neutral_chroma + field_seq + frame_field_info flags
    if r.read_flag() {
        // default_display_window_flag
        r.read_ueg();
        r.read_ueg();
        r.read_ueg();
        r.read_ueg();
    }
    if !r.read_flag() || r.eof() {
        // vui_timing_info_present_flag
        return None;
    }
    let num_units_in_tick = r.read_u(32);
    let time_scale = r.read_u(32);
    if num_units_in_tick == 0 || time_scale == 0 {
        return None;
    }
    Some((num_units_in_tick, time_scale))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vps {
    pub max_sub_layers_minus1: u32,
}

impl Vps {
    pub fn parse(rbsp: &[u8]) -> Result<(u8, Vps), Error> {
        let mut r = BitCursor::new(rbsp);
        let id = r.read_u(4) as u8;
        r.skip(2); // vps_base_layer_internal/available flags
        r.skip(6); // vps_max_layers_minus1
        let max_sub_layers_minus1 = r.read_u(3);
        Ok((id, Vps { max_sub_layers_minus1 }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pps {
    pub seq_parameter_set_id: u8,
}

impl Pps {
    pub fn parse(rbsp: &[u8]) -> Result<(u8, Pps), Error> {
        let mut r = BitCursor::new(rbsp);
        let id = r.read_ueg();
        if id > 63 {
            return Err(Error::Parse("pps_pic_parameter_set_id out of range"));
        }
        let sps_id = r.read_ueg();
        if sps_id > 15 {
            return Err(Error::Parse("pps_seq_parameter_set_id out of range"));
        }
        Ok((
            id as u8,
            Pps {
                seq_parameter_set_id: sps_id as u8,
            },
        ))
    }
}

/// The slice-segment-header fields that matter for access-unit assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceHeader {
    pub first_slice_segment_in_pic_flag: bool,
    pub no_output_of_prior_pics_flag: bool,
    pub pic_parameter_set_id: u32,
}

impl SliceHeader {
    pub fn parse(rbsp: &[u8], nal_type: u8) -> Result<SliceHeader, Error> {
        if rbsp.is_empty() {
            return Err(Error::Parse("empty slice segment header"));
        }
        let mut r = BitCursor::new(rbsp);
        let first_slice_segment_in_pic_flag = r.read_flag();
        let mut no_output_of_prior_pics_flag = false;
        if is_irap(nal_type) {
            no_output_of_prior_pics_flag = r.read_flag();
        }
        let pic_parameter_set_id = r.read_ueg();
        if pic_parameter_set_id > 63 {
            return Err(Error::Parse("slice_pic_parameter_set_id out of range"));
        }
        Ok(SliceHeader {
            first_slice_segment_in_pic_flag,
            no_output_of_prior_pics_flag,
            pic_parameter_set_id,
        })
    }
}

/// Per-stream parameter tables plus the last slice header seen.
#[derive(Debug, Default)]
pub struct StreamInfo {
    pub vps: FnvHashMap<u8, Vps>,
    pub sps: FnvHashMap<u8, Sps>,
    pub pps: FnvHashMap<u8, Pps>,
    pub last_slice: Option<SliceHeader>,
}

impl StreamInfo {
    pub fn new() -> StreamInfo {
        StreamInfo::default()
    }

    pub fn handle_vps(&mut self, rbsp: &[u8]) -> Result<(), Error> {
        let (id, vps) = Vps::parse(rbsp)?;
        self.vps.insert(id, vps);
        Ok(())
    }

    /// Parses and stores an SPS; existing state for the id is replaced
    /// only on success.
    pub fn handle_sps(&mut self, rbsp: &[u8]) -> Result<&Sps, Error> {
        let (id, sps) = Sps::parse(rbsp)?;
        self.sps.insert(id, sps);
        Ok(&self.sps[&id])
    }

    pub fn handle_pps(&mut self, rbsp: &[u8]) -> Result<(), Error> {
        let (id, pps) = Pps::parse(rbsp)?;
        self.pps.insert(id, pps);
        Ok(())
    }

    /// Parses a slice-segment header, records it, and reports whether it
    /// begins a new picture.
    pub fn handle_slice(&mut self, rbsp: &[u8], nal_type: u8) -> Result<bool, Error> {
        let header = SliceHeader::parse(rbsp, nal_type)?;
        let new_picture = self.is_new_picture(&header);
        self.record_slice(header);
        Ok(new_picture)
    }

    /// `first_slice_segment_in_pic_flag` alone decides boundaries.
    pub fn is_new_picture(&self, header: &SliceHeader) -> bool {
        header.first_slice_segment_in_pic_flag
    }

    pub fn record_slice(&mut self, header: SliceHeader) {
        self.last_slice = Some(header);
    }
}
