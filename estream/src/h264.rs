//! H.264/AVC parameter-set and slice-header parsing, to the depth needed
//! for access-unit boundary detection and decoder-configuration
//! extraction. Field names follow ISO/IEC 14496-10 section 7.3.

use fnv::FnvHashMap;

use crate::bits::BitCursor;
use crate::{Codec, ChromaFormat, DecoderConfig, Error, ScanType};

pub const NAL_SLICE: u8 = 1;
pub const NAL_IDR: u8 = 5;
pub const NAL_SEI: u8 = 6;
pub const NAL_SPS: u8 = 7;
pub const NAL_PPS: u8 = 8;
pub const NAL_AUD: u8 = 9;
pub const NAL_PREFIX: u8 = 14;

/// True for NAL types that carry coded slice data (Table 7-1 types 1-5).
pub fn is_vcl(nal_type: u8) -> bool {
    (1..=5).contains(&nal_type)
}

const HIGH_PROFILES: [u8; 13] = [100, 110, 122, 244, 44, 83, 86, 118, 128, 138, 139, 134, 135];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sps {
    pub profile_idc: u8,
    pub level_idc: u8,
    pub chroma_format_idc: u32,
    pub separate_colour_plane_flag: bool,
    pub bit_depth_luma: u8,
    pub log2_max_frame_num: u32,
    pub pic_order_cnt_type: u32,
    pub log2_max_pic_order_cnt_lsb: u32,
    pub delta_pic_order_always_zero_flag: bool,
    pub frame_mbs_only_flag: bool,
    /// Coded dimensions with the frame crop applied.
    pub width: u32,
    pub height: u32,
    /// `(num_units_in_tick, time_scale)` from VUI, when present.
    pub timing: Option<(u32, u32)>,
}

impl Sps {
    /// Parses a `seq_parameter_set_rbsp`, returning the id and the record.
    pub fn parse(rbsp: &[u8]) -> Result<(u8, Sps), Error> {
        let mut r = BitCursor::new(rbsp);
        let profile_idc = r.read_u(8) as u8;
        r.skip(8); // constraint_set*_flags + reserved_zero_2bits
        let level_idc = r.read_u(8) as u8;
        let id = r.read_ueg();
        if id > 31 {
            return Err(Error::Parse("seq_parameter_set_id out of range"));
        }

        let mut chroma_format_idc = 1;
        let mut separate_colour_plane_flag = false;
        let mut bit_depth_luma = 8;
        if HIGH_PROFILES.contains(&profile_idc) {
            chroma_format_idc = r.read_ueg();
            if chroma_format_idc > 3 {
                return Err(Error::Parse("chroma_format_idc out of range"));
            }
            if chroma_format_idc == 3 {
                separate_colour_plane_flag = r.read_flag();
            }
            bit_depth_luma = 8 + r.read_ueg().min(8) as u8;
            r.read_ueg(); // bit_depth_chroma_minus8
            r.read_flag(); // qpprime_y_zero_transform_bypass_flag
            if r.read_flag() {
                // seq_scaling_matrix_present_flag
                let lists = if chroma_format_idc != 3 { 8 } else { 12 };
                for i in 0..lists {
                    if r.read_flag() {
                        skip_scaling_list(&mut r, if i < 6 { 16 } else { 64 });
                    }
                }
            }
        }

        let log2_max_frame_num_minus4 = r.read_ueg();
        if log2_max_frame_num_minus4 > 12 {
            return Err(Error::Parse("log2_max_frame_num out of range"));
        }
        let log2_max_frame_num = 4 + log2_max_frame_num_minus4;
        let pic_order_cnt_type = r.read_ueg();
        let mut log2_max_pic_order_cnt_lsb = 0;
        let mut delta_pic_order_always_zero_flag = false;
        match pic_order_cnt_type {
            0 => {
                let minus4 = r.read_ueg();
                if minus4 > 12 {
                    return Err(Error::Parse("log2_max_pic_order_cnt_lsb out of range"));
                }
                log2_max_pic_order_cnt_lsb = 4 + minus4;
            }
            1 => {
                delta_pic_order_always_zero_flag = r.read_flag();
                r.read_seg(); // offset_for_non_ref_pic
                r.read_seg(); // offset_for_top_to_bottom_field
                let cycle = r.read_ueg();
                if cycle > 255 {
                    return Err(Error::Parse("num_ref_frames_in_pic_order_cnt_cycle out of range"));
                }
                for _ in 0..cycle {
                    r.read_seg(); // offset_for_ref_frame
                }
            }
            2 => {}
            _ => return Err(Error::Parse("pic_order_cnt_type out of range")),
        }

        r.read_ueg(); // max_num_ref_frames
        r.read_flag(); // gaps_in_frame_num_value_allowed_flag
        let pic_width_in_mbs = 1 + r.read_ueg();
        let pic_height_in_map_units = 1 + r.read_ueg();
        if pic_width_in_mbs > 1024 || pic_height_in_map_units > 1024 {
            return Err(Error::Parse("coded size out of range"));
        }
        let frame_mbs_only_flag = r.read_flag();
        if !frame_mbs_only_flag {
            r.read_flag(); // mb_adaptive_frame_field_flag
        }
        r.read_flag(); // direct_8x8_inference_flag

        let frame_height_mult = if frame_mbs_only_flag { 1 } else { 2 };
        let mut width = pic_width_in_mbs * 16;
        let mut height = pic_height_in_map_units * 16 * frame_height_mult;
        if r.read_flag() {
            // frame_cropping_flag
            let left = u64::from(r.read_ueg());
            let right = u64::from(r.read_ueg());
            let top = u64::from(r.read_ueg());
            let bottom = u64::from(r.read_ueg());
            let (sub_w, sub_h) = match chroma_format_idc {
                0 | 3 => (1, 1),
                2 => (2, 1),
                _ => (2, 2),
            };
            let crop_w = (sub_w * (left + right)).min(u64::from(u32::MAX)) as u32;
            let crop_h = (sub_h * u64::from(frame_height_mult) * (top + bottom))
                .min(u64::from(u32::MAX)) as u32;
            width = width.saturating_sub(crop_w);
            height = height.saturating_sub(crop_h);
        }

        let mut timing = None;
        if r.read_flag() {
            // vui_parameters_present_flag
            timing = parse_vui_timing(&mut r);
        }
        if width == 0 || height == 0 {
            return Err(Error::Parse("cropped dimensions are empty"));
        }

        Ok((
            id as u8,
            Sps {
                profile_idc,
                level_idc,
                chroma_format_idc,
                separate_colour_plane_flag,
                bit_depth_luma,
                log2_max_frame_num,
                pic_order_cnt_type,
                log2_max_pic_order_cnt_lsb,
                delta_pic_order_always_zero_flag,
                frame_mbs_only_flag,
                width,
                height,
                timing,
            },
        ))
    }

    pub fn decoder_config(&self) -> DecoderConfig {
        let (num, den) = match self.timing {
            Some((num_units, time_scale)) => {
                // A frame is two fields' worth of ticks (E.2.1).
                crate::reduce_fraction(u64::from(time_scale), 2 * u64::from(num_units))
            }
            None => (0, 0),
        };
        DecoderConfig {
            codec: Codec::H264,
            profile: self.profile_idc,
            level: self.level_idc,
            bit_depth: self.bit_depth_luma,
            width: self.width,
            height: self.height,
            chroma: ChromaFormat::from_idc(self.chroma_format_idc),
            scan: if self.frame_mbs_only_flag {
                ScanType::Progressive
            } else {
                ScanType::Interlaced
            },
            frame_rate_num: num,
            frame_rate_den: den,
        }
    }
}

fn skip_scaling_list(r: &mut BitCursor, len: u32) {
    let mut last_scale = 8i32;
    let mut next_scale = 8i32;
    for _ in 0..len {
        if next_scale != 0 {
            let delta = r.read_seg();
            next_scale = (last_scale + delta + 256) % 256;
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }
}

/// Walks the VUI prefix up to `timing_info` and returns
/// `(num_units_in_tick, time_scale)` when present and nonzero (E.1.1).
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
    if !r.read_flag() || r.eof() {
        // timing_info_present_flag
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
pub struct Pps {
    pub seq_parameter_set_id: u8,
    pub pic_order_present_flag: bool,
}

impl Pps {
    /// Parses a `pic_parameter_set_rbsp` prefix, returning the id and
    /// record.
    pub fn parse(rbsp: &[u8]) -> Result<(u8, Pps), Error> {
        let mut r = BitCursor::new(rbsp);
        let id = r.read_ueg();
        if id > 255 {
            return Err(Error::Parse("pic_parameter_set_id out of range"));
        }
        let sps_id = r.read_ueg();
        if sps_id > 31 {
            return Err(Error::Parse("seq_parameter_set_id out of range"));
        }
        r.read_flag(); // entropy_coding_mode_flag
        let pic_order_present_flag = r.read_flag();
        Ok((
            id as u8,
            Pps {
                seq_parameter_set_id: sps_id as u8,
                pic_order_present_flag,
            },
        ))
    }
}

/// The slice-header fields that decide access-unit boundaries (7.4.1.2.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceHeader {
    pub nal_ref_idc: u8,
    pub nal_unit_type: u8,
    pub pic_parameter_set_id: u32,
    pub frame_num: u32,
    pub field_pic_flag: bool,
    pub bottom_field_flag: bool,
    pub idr_pic_id: u32,
    pub pic_order_cnt_lsb: u32,
    pub delta_pic_order_cnt_bottom: i32,
    pub delta_pic_order_cnt: [i32; 2],
    pic_order_cnt_type: u32,
    pic_order_present_flag: bool,
}

impl SliceHeader {
    /// Whether this slice begins a new coded picture relative to the
    /// previous slice of the stream.
    pub fn starts_new_picture(&self, prev: &SliceHeader) -> bool {
        if self.frame_num != prev.frame_num
            || self.pic_parameter_set_id != prev.pic_parameter_set_id
            || self.field_pic_flag != prev.field_pic_flag
            || self.bottom_field_flag != prev.bottom_field_flag
            || (self.nal_ref_idc == 0) != (prev.nal_ref_idc == 0)
            || (self.nal_unit_type == NAL_IDR) != (prev.nal_unit_type == NAL_IDR)
        {
            return true;
        }
        if self.nal_unit_type == NAL_IDR && self.idr_pic_id != prev.idr_pic_id {
            return true;
        }
        match self.pic_order_cnt_type {
            0 => {
                self.pic_order_cnt_lsb != prev.pic_order_cnt_lsb
                    || (self.pic_order_present_flag
                        && self.delta_pic_order_cnt_bottom != prev.delta_pic_order_cnt_bottom)
            }
            1 => self.delta_pic_order_cnt != prev.delta_pic_order_cnt,
            _ => false,
        }
    }
}

/// Per-stream parameter tables plus the last slice header seen; map
/// presence is the slot's validity.
#[derive(Debug, Default)]
pub struct StreamInfo {
    pub sps: FnvHashMap<u8, Sps>,
    pub pps: FnvHashMap<u8, Pps>,
    pub last_slice: Option<SliceHeader>,
}

impl StreamInfo {
    pub fn new() -> StreamInfo {
        StreamInfo::default()
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

    /// Parses a VCL NAL's slice header, records it as the last seen, and
    /// reports whether it begins a new picture.
    pub fn handle_slice(&mut self, rbsp: &[u8], nal_header: u8) -> Result<bool, Error> {
        let header = self.parse_slice(rbsp, nal_header)?;
        let new_picture = self.is_new_picture(&header);
        self.record_slice(header);
        Ok(new_picture)
    }

    /// Whether `header` begins a new picture relative to the last slice
    /// recorded; a first slice always does.
    pub fn is_new_picture(&self, header: &SliceHeader) -> bool {
        match self.last_slice {
            Some(ref prev) => header.starts_new_picture(prev),
            None => true,
        }
    }

    pub fn record_slice(&mut self, header: SliceHeader) {
        self.last_slice = Some(header);
    }

    /// Parses a slice header without touching parser state; tolerant of a
    /// truncated tail (missing bits read as zero).
    pub fn parse_slice(&self, rbsp: &[u8], nal_header: u8) -> Result<SliceHeader, Error> {
        let nal_ref_idc = nal_header >> 5;
        let nal_unit_type = nal_header & 0x1f;
        let mut r = BitCursor::new(rbsp);
        r.read_ueg(); // first_mb_in_slice
        r.read_ueg(); // slice_type
        let pps_id = r.read_ueg();
        let pps = self
            .pps
            .get(&(pps_id.min(255) as u8))
            .ok_or(Error::Parse("slice references an unknown PPS"))?;
        let sps = self
            .sps
            .get(&pps.seq_parameter_set_id)
            .ok_or(Error::Parse("slice references an unknown SPS"))?;

        if sps.separate_colour_plane_flag {
            r.skip(2); // colour_plane_id
        }
        let frame_num = r.read_u(sps.log2_max_frame_num);
        let mut field_pic_flag = false;
        let mut bottom_field_flag = false;
        if !sps.frame_mbs_only_flag {
            field_pic_flag = r.read_flag();
            if field_pic_flag {
                bottom_field_flag = r.read_flag();
            }
        }
        let mut idr_pic_id = 0;
        if nal_unit_type == NAL_IDR {
            idr_pic_id = r.read_ueg();
        }
        let mut pic_order_cnt_lsb = 0;
        let mut delta_pic_order_cnt_bottom = 0;
        let mut delta_pic_order_cnt = [0, 0];
        match sps.pic_order_cnt_type {
            0 => {
                pic_order_cnt_lsb = r.read_u(sps.log2_max_pic_order_cnt_lsb);
                if pps.pic_order_present_flag && !field_pic_flag {
                    delta_pic_order_cnt_bottom = r.read_seg();
                }
            }
            1 if !sps.delta_pic_order_always_zero_flag => {
                delta_pic_order_cnt[0] = r.read_seg();
                if pps.pic_order_present_flag && !field_pic_flag {
                    delta_pic_order_cnt[1] = r.read_seg();
                }
            }
            _ => {}
        }

        Ok(SliceHeader {
            nal_ref_idc,
            nal_unit_type,
            pic_parameter_set_id: pps_id,
            frame_num,
            field_pic_flag,
            bottom_field_flag,
            idr_pic_id,
            pic_order_cnt_lsb,
            delta_pic_order_cnt_bottom,
            delta_pic_order_cnt,
            pic_order_cnt_type: sps.pic_order_cnt_type,
            pic_order_present_flag: pps.pic_order_present_flag,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{Pps, Sps};
    use crate::rbsp::to_rbsp;
    use crate::ChromaFormat;

    // SPS from the pack's parser test corpus (baseline profile).
    const SPS_A: [u8; 21] = [
        0x42, 0x00, 0x1f, 0xac, 0x34, 0xc8, 0x14, 0x00, 0x00, 0x03, 0x00, 0x04, 0x00, 0x00, 0x03,
        0x00, 0xf0, 0x3c, 0x60, 0xc6, 0x58,
    ];

    // SPS from a GW Security GW4089IP camera (main profile).
    const SPS_B: [u8; 13] = [
        0x4d, 0x00, 0x1e, 0x95, 0xa8, 0x2d, 0x0f, 0x69, 0xb8, 0x08, 0x08, 0x08, 0x10,
    ];

    #[test]
    fn parses_baseline_sps() {
        let rbsp = to_rbsp(&SPS_A).unwrap();
        let (id, sps) = Sps::parse(&rbsp).unwrap();
        assert_eq!(id, 0);
        assert_eq!(sps.profile_idc, 66);
        assert_eq!(sps.level_idc, 31);
        assert!(sps.width > 0);
        assert!(sps.height > 0);
        let config = sps.decoder_config();
        assert_eq!(config.chroma, ChromaFormat::C420);
        assert_eq!(config.bit_depth, 8);
    }

    #[test]
    fn parses_main_sps() {
        let rbsp = to_rbsp(&SPS_B).unwrap();
        let (_, sps) = Sps::parse(&rbsp).unwrap();
        assert_eq!(sps.profile_idc, 77);
        assert_eq!(sps.level_idc, 30);
        assert!(sps.width > 0);
        assert!(sps.height > 0);
    }

    #[test]
    fn parses_pps() {
        // From the same GW Security stream: pps id 0, sps id 0.
        let rbsp = to_rbsp(&[0xee, 0x3c, 0x80]).unwrap();
        let (id, pps) = Pps::parse(&rbsp).unwrap();
        assert_eq!(id, 0);
        assert_eq!(pps.seq_parameter_set_id, 0);
    }

    #[test]
    fn rejects_bad_sps_id() {
        // ue(32) for seq_parameter_set_id.
        let mut rbsp = vec![0x42, 0x00, 0x1f];
        rbsp.extend_from_slice(&[0b0000_0100, 0b0010_0000]);
        assert!(Sps::parse(&rbsp).is_err());
    }
}
