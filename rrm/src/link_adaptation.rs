//! LTE link-adaptation tables
//!
//! CQI to MCS, MCS to TBS index (3GPP TS 36.213 Tables 7.1.7.1-1 and
//! 8.6.1-1), transport block sizes (TS 36.213 Table 7.1.7.2.1-1) and the
//! buffer size levels of a BSR (TS 36.321 Table 6.1.3.1-1).
//!
//! All lookups are total over their documented domains and panic outside
//! them: an out-of-range index here is a bug in the caller, never a runtime
//! condition.

use common::types::{BsrIndex, Cqi, Direction, Mcs};

/// Highest transport block size index
pub const MAX_ITBS: u8 = 26;

/// Largest RB count covered by the TBS table
pub const MAX_RB: u32 = 110;

/// Wideband CQI to MCS index
pub const CQI_TO_MCS: [u8; 16] = [0, 0, 1, 2, 4, 6, 8, 11, 13, 16, 18, 20, 23, 25, 27, 28];

/// Downlink MCS to I_TBS (PDSCH, Table 7.1.7.1-1)
pub const DL_MCS_TO_ITBS: [u8; 29] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 9, // QPSK
    9, 10, 11, 12, 13, 14, 15, // 16-QAM
    15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, // 64-QAM
];

/// Uplink MCS to I_TBS (PUSCH, Table 8.6.1-1)
pub const UL_MCS_TO_ITBS: [u8; 29] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, // QPSK
    10, 11, 12, 13, 14, 15, 16, 17, 18, 19, // 16-QAM
    19, 20, 21, 22, 23, 24, 25, 26, // 64-QAM
];

/// Upper bound in bytes of each BSR buffer size level; index 63 saturates
pub const BSR_TABLE: [u32; 64] = [
    0, 10, 12, 14, 17, 19, 22, 26, 31, 36, 42, 49, 57, 67, 78, 91,
    107, 125, 146, 171, 200, 234, 274, 321, 376, 440, 515, 603, 706, 826, 967, 1132,
    1326, 1552, 1817, 2127, 2490, 2915, 3413, 3995, 4677, 5476, 6411, 7505, 8787, 10287, 12043, 14099,
    16507, 19325, 22624, 26487, 31009, 36304, 42502, 49759, 58255, 68201, 79846, 93479, 109439, 128125,
    150000, 150000,
];

/// Transport block size in bits, indexed by `[I_TBS][N_RB - 1]` (Table 7.1.7.2.1-1)
#[rustfmt::skip]
pub const TBS_TABLE: [[u32; MAX_RB as usize]; MAX_ITBS as usize + 1] = [
    // I_TBS 0
    [
        16, 32, 56, 88, 120, 152, 176, 208, 224, 256,
        288, 328, 344, 376, 392, 424, 456, 488, 504, 536,
        568, 600, 616, 648, 680, 712, 744, 776, 776, 808,
        840, 872, 904, 936, 968, 1000, 1032, 1032, 1064, 1096,
        1128, 1160, 1192, 1224, 1256, 1256, 1288, 1320, 1352, 1384,
        1416, 1416, 1480, 1480, 1544, 1544, 1608, 1608, 1608, 1672,
        1672, 1736, 1736, 1800, 1800, 1800, 1864, 1864, 1928, 1928,
        1992, 1992, 2024, 2088, 2088, 2088, 2152, 2152, 2216, 2216,
        2280, 2280, 2280, 2344, 2344, 2408, 2408, 2472, 2472, 2536,
        2536, 2536, 2600, 2600, 2664, 2664, 2728, 2728, 2728, 2792,
        2792, 2856, 2856, 2856, 2984, 2984, 2984, 2984, 2984, 3112,
    ],
    // I_TBS 1
    [
        24, 56, 88, 144, 176, 208, 224, 256, 328, 344,
        376, 424, 456, 488, 520, 568, 600, 632, 680, 712,
        744, 776, 808, 872, 904, 936, 968, 1000, 1032, 1064,
        1128, 1160, 1192, 1224, 1256, 1288, 1352, 1384, 1416, 1416,
        1480, 1544, 1544, 1608, 1608, 1672, 1736, 1736, 1800, 1800,
        1864, 1864, 1928, 1992, 1992, 2024, 2088, 2088, 2152, 2152,
        2216, 2280, 2280, 2344, 2344, 2408, 2472, 2472, 2536, 2536,
        2600, 2600, 2664, 2728, 2728, 2792, 2792, 2856, 2856, 2856,
        2984, 2984, 2984, 3112, 3112, 3112, 3240, 3240, 3240, 3240,
        3368, 3368, 3368, 3496, 3496, 3496, 3496, 3624, 3624, 3624,
        3752, 3752, 3752, 3752, 3880, 3880, 3880, 4008, 4008, 4008,
    ],
    // I_TBS 2
    [
        32, 72, 144, 176, 208, 256, 296, 328, 376, 424,
        472, 520, 568, 616, 648, 696, 744, 776, 840, 872,
        936, 968, 1032, 1064, 1096, 1160, 1192, 1256, 1288, 1320,
        1384, 1416, 1480, 1544, 1544, 1608, 1672, 1672, 1736, 1800,
        1800, 1864, 1928, 1992, 2024, 2088, 2088, 2152, 2216, 2216,
        2280, 2344, 2344, 2408, 2472, 2536, 2536, 2600, 2664, 2664,
        2728, 2792, 2856, 2856, 2856, 2984, 2984, 3112, 3112, 3112,
        3240, 3240, 3240, 3368, 3368, 3368, 3496, 3496, 3496, 3624,
        3624, 3624, 3752, 3752, 3880, 3880, 3880, 4008, 4008, 4008,
        4136, 4136, 4136, 4264, 4264, 4264, 4392, 4392, 4392, 4584,
        4584, 4584, 4584, 4584, 4776, 4776, 4776, 4776, 4968, 4968,
    ],
    // I_TBS 3
    [
        40, 104, 176, 208, 256, 328, 392, 440, 504, 568,
        616, 680, 744, 808, 872, 904, 968, 1032, 1096, 1160,
        1224, 1256, 1320, 1384, 1416, 1480, 1544, 1608, 1672, 1736,
        1800, 1864, 1928, 1992, 2024, 2088, 2152, 2216, 2280, 2344,
        2408, 2472, 2472, 2536, 2600, 2664, 2728, 2792, 2856, 2856,
        2984, 2984, 3112, 3112, 3240, 3240, 3368, 3368, 3496, 3496,
        3624, 3624, 3624, 3752, 3752, 3880, 3880, 4008, 4008, 4136,
        4136, 4264, 4264, 4264, 4392, 4392, 4584, 4584, 4584, 4584,
        4776, 4776, 4776, 4968, 4968, 4968, 5160, 5160, 5160, 5352,
        5352, 5352, 5352, 5544, 5544, 5544, 5736, 5736, 5736, 5736,
        5992, 5992, 5992, 5992, 6200, 6200, 6200, 6200, 6456, 6456,
    ],
    // I_TBS 4
    [
        56, 120, 208, 256, 328, 408, 488, 552, 632, 696,
        776, 840, 904, 1000, 1064, 1128, 1192, 1288, 1352, 1416,
        1480, 1544, 1608, 1736, 1800, 1864, 1928, 1992, 2088, 2152,
        2216, 2280, 2344, 2408, 2536, 2600, 2664, 2728, 2792, 2856,
        2984, 2984, 3112, 3112, 3240, 3240, 3368, 3496, 3496, 3624,
        3624, 3752, 3752, 3880, 4008, 4008, 4136, 4136, 4264, 4264,
        4392, 4392, 4584, 4584, 4584, 4776, 4776, 4968, 4968, 4968,
        5160, 5160, 5160, 5352, 5352, 5544, 5544, 5544, 5736, 5736,
        5736, 5992, 5992, 5992, 6200, 6200, 6200, 6456, 6456, 6456,
        6456, 6712, 6712, 6712, 6712, 6968, 6968, 6968, 7224, 7224,
        7224, 7224, 7480, 7480, 7480, 7736, 7736, 7736, 7736, 7992,
    ],
    // I_TBS 5
    [
        72, 144, 224, 328, 424, 504, 600, 680, 776, 872,
        968, 1032, 1128, 1224, 1320, 1384, 1480, 1544, 1672, 1736,
        1864, 1928, 2024, 2088, 2216, 2280, 2344, 2472, 2536, 2664,
        2728, 2792, 2856, 2984, 3112, 3112, 3240, 3368, 3496, 3496,
        3624, 3752, 3752, 3880, 4008, 4008, 4136, 4264, 4264, 4392,
        4584, 4584, 4776, 4776, 4776, 4968, 4968, 5160, 5160, 5352,
        5352, 5544, 5544, 5736, 5736, 5736, 5992, 5992, 6200, 6200,
        6200, 6456, 6456, 6456, 6712, 6712, 6712, 6968, 6968, 6968,
        7224, 7224, 7224, 7480, 7480, 7736, 7736, 7736, 7992, 7992,
        7992, 8248, 8248, 8248, 8504, 8504, 8504, 8760, 8760, 8760,
        8760, 9144, 9144, 9144, 9144, 9528, 9528, 9528, 9528, 9912,
    ],
    // I_TBS 6
    [
        88, 176, 256, 392, 504, 600, 712, 808, 936, 1032,
        1128, 1224, 1352, 1480, 1544, 1672, 1736, 1864, 1992, 2088,
        2152, 2280, 2408, 2472, 2600, 2728, 2792, 2856, 2984, 3112,
        3240, 3368, 3496, 3496, 3624, 3752, 3880, 4008, 4008, 4136,
        4264, 4392, 4584, 4584, 4776, 4776, 4968, 4968, 5160, 5160,
        5352, 5352, 5544, 5736, 5736, 5736, 5992, 5992, 6200, 6200,
        6456, 6456, 6712, 6712, 6712, 6968, 6968, 7224, 7224, 7224,
        7480, 7480, 7736, 7736, 7736, 7992, 7992, 8248, 8248, 8248,
        8504, 8504, 8760, 8760, 8760, 9144, 9144, 9144, 9144, 9528,
        9528, 9528, 9912, 9912, 9912, 9912, 10296, 10296, 10296, 10296,
        10680, 10680, 10680, 11064, 11064, 11064, 11064, 11448, 11448, 11448,
    ],
    // I_TBS 7
    [
        104, 224, 328, 472, 584, 712, 840, 968, 1096, 1224,
        1320, 1480, 1608, 1672, 1800, 1928, 2088, 2216, 2344, 2472,
        2536, 2664, 2792, 2984, 3112, 3240, 3368, 3368, 3496, 3624,
        3752, 3880, 4008, 4136, 4264, 4392, 4584, 4584, 4776, 4968,
        4968, 5160, 5352, 5352, 5544, 5736, 5736, 5992, 5992, 6200,
        6200, 6456, 6456, 6712, 6712, 6968, 6968, 7224, 7224, 7480,
        7480, 7736, 7736, 7992, 7992, 7992, 8248, 8248, 8504, 8504,
        8760, 8760, 9144, 9144, 9144, 9528, 9528, 9528, 9528, 9912,
        9912, 9912, 10296, 10296, 10296, 10680, 10680, 10680, 11064, 11064,
        11064, 11448, 11448, 11448, 11832, 11832, 11832, 12216, 12216, 12216,
        12576, 12576, 12576, 12960, 12960, 12960, 12960, 13536, 13536, 13536,
    ],
    // I_TBS 8
    [
        120, 256, 392, 536, 680, 808, 968, 1096, 1256, 1384,
        1544, 1672, 1800, 1928, 2088, 2216, 2344, 2536, 2664, 2792,
        2984, 3112, 3240, 3368, 3496, 3624, 3752, 3880, 4008, 4264,
        4392, 4392, 4584, 4776, 4968, 4968, 5160, 5352, 5544, 5544,
        5736, 5992, 5992, 6200, 6200, 6456, 6712, 6712, 6968, 6968,
        7224, 7224, 7480, 7480, 7736, 7736, 7992, 8248, 8248, 8504,
        8504, 8760, 8760, 9144, 9144, 9144, 9528, 9528, 9528, 9912,
        9912, 10296, 10296, 10296, 10680, 10680, 10680, 11064, 11064, 11064,
        11448, 11448, 11832, 11832, 11832, 12216, 12216, 12216, 12576, 12576,
        12960, 12960, 12960, 12960, 13536, 13536, 13536, 13536, 14112, 14112,
        14112, 14112, 14688, 14688, 14688, 14688, 15264, 15264, 15264, 15264,
    ],
    // I_TBS 9
    [
        136, 296, 456, 616, 776, 936, 1096, 1256, 1416, 1544,
        1736, 1864, 2024, 2216, 2344, 2536, 2664, 2856, 2984, 3112,
        3368, 3496, 3624, 3752, 4008, 4136, 4264, 4392, 4584, 4776,
        4968, 5160, 5160, 5352, 5544, 5736, 5736, 5992, 6200, 6456,
        6456, 6712, 6712, 6968, 7224, 7224, 7480, 7736, 7736, 7992,
        7992, 8248, 8504, 8504, 8760, 8760, 9144, 9144, 9528, 9528,
        9528, 9912, 9912, 10296, 10296, 10296, 10680, 10680, 11064, 11064,
        11448, 11448, 11448, 11832, 11832, 12216, 12216, 12216, 12576, 12576,
        12960, 12960, 12960, 13536, 13536, 13536, 13536, 14112, 14112, 14112,
        14688, 14688, 14688, 14688, 15264, 15264, 15264, 15840, 15840, 15840,
        15840, 16416, 16416, 16416, 16416, 16992, 16992, 16992, 17568, 17568,
    ],
    // I_TBS 10
    [
        144, 328, 504, 680, 872, 1032, 1224, 1384, 1544, 1736,
        1928, 2088, 2216, 2408, 2600, 2728, 2984, 3112, 3240, 3496,
        3624, 3752, 4008, 4136, 4264, 4584, 4584, 4776, 4968, 5160,
        5352, 5544, 5736, 5992, 5992, 6200, 6456, 6456, 6712, 6968,
        7224, 7224, 7480, 7736, 7736, 7992, 8248, 8248, 8504, 8760,
        8760, 9144, 9144, 9528, 9528, 9528, 9912, 9912, 10296, 10296,
        10680, 10680, 11064, 11064, 11448, 11448, 11448, 11832, 11832, 12216,
        12216, 12576, 12576, 12960, 12960, 12960, 13536, 13536, 13536, 14112,
        14112, 14112, 14112, 14688, 14688, 14688, 15264, 15264, 15264, 15840,
        15840, 15840, 16416, 16416, 16416, 16416, 16992, 16992, 16992, 17568,
        17568, 17568, 17568, 18336, 18336, 18336, 18336, 19080, 19080, 19080,
    ],
    // I_TBS 11
    [
        176, 376, 584, 776, 1000, 1192, 1384, 1608, 1800, 2024,
        2216, 2408, 2600, 2792, 2984, 3240, 3496, 3624, 3752, 4008,
        4264, 4392, 4584, 4776, 4968, 5160, 5352, 5544, 5736, 5992,
        6200, 6456, 6712, 6712, 6968, 7224, 7480, 7736, 7736, 7992,
        8248, 8504, 8760, 8760, 9144, 9144, 9528, 9528, 9912, 9912,
        10296, 10296, 10680, 10680, 11064, 11064, 11448, 11832, 11832, 12216,
        12216, 12576, 12576, 12960, 12960, 13536, 13536, 13536, 14112, 14112,
        14112, 14688, 14688, 14688, 15264, 15264, 15264, 15840, 15840, 15840,
        16416, 16416, 16416, 16992, 16992, 17568, 17568, 17568, 17568, 18336,
        18336, 18336, 18336, 19080, 19080, 19080, 19848, 19848, 19848, 19848,
        20616, 20616, 20616, 20616, 21384, 21384, 21384, 21384, 22152, 22152,
    ],
    // I_TBS 12
    [
        208, 440, 680, 904, 1128, 1352, 1608, 1800, 2024, 2280,
        2472, 2728, 2984, 3112, 3368, 3624, 3880, 4136, 4392, 4584,
        4776, 4968, 5160, 5544, 5736, 5992, 6200, 6456, 6712, 6712,
        6968, 7224, 7480, 7736, 7992, 8248, 8504, 8760, 8760, 9144,
        9528, 9528, 9912, 9912, 10296, 10296, 10680, 11064, 11064, 11448,
        11448, 11832, 12216, 12216, 12576, 12960, 12960, 12960, 13536, 13536,
        14112, 14112, 14112, 14688, 14688, 15264, 15264, 15264, 15840, 15840,
        16416, 16416, 16416, 16992, 16992, 17568, 17568, 17568, 18336, 18336,
        18336, 19080, 19080, 19080, 19080, 19848, 19848, 19848, 20616, 20616,
        20616, 20616, 21384, 21384, 21384, 22152, 22152, 22152, 22920, 22920,
        22920, 22920, 23688, 23688, 23688, 24496, 24496, 24496, 24496, 25456,
    ],
    // I_TBS 13
    [
        224, 488, 744, 1000, 1256, 1544, 1800, 2024, 2280, 2536,
        2856, 3112, 3368, 3624, 3880, 4136, 4392, 4584, 4968, 5160,
        5352, 5736, 5992, 6200, 6456, 6712, 6968, 7224, 7480, 7736,
        7992, 8248, 8504, 8760, 9144, 9144, 9528, 9912, 9912, 10296,
        10680, 10680, 11064, 11448, 11832, 11832, 12216, 12576, 12576, 12960,
        12960, 13536, 13536, 14112, 14112, 14688, 14688, 15264, 15264, 15264,
        15840, 15840, 16416, 16416, 16992, 16992, 17568, 17568, 17568, 18336,
        18336, 18336, 19080, 19080, 19080, 19848, 19848, 19848, 20616, 20616,
        20616, 21384, 21384, 21384, 22152, 22152, 22152, 22920, 22920, 23688,
        23688, 23688, 23688, 24496, 24496, 24496, 25456, 25456, 25456, 25456,
        26416, 26416, 26416, 27376, 27376, 27376, 27376, 28336, 28336, 28336,
    ],
    // I_TBS 14
    [
        256, 552, 840, 1128, 1416, 1736, 1992, 2280, 2600, 2856,
        3112, 3496, 3752, 4008, 4264, 4584, 4968, 5160, 5544, 5736,
        5992, 6200, 6712, 6968, 7224, 7480, 7736, 7992, 8248, 8504,
        8760, 9144, 9528, 9912, 9912, 10296, 10680, 11064, 11064, 11448,
        11832, 12216, 12216, 12576, 12960, 12960, 13536, 13536, 14112, 14112,
        14688, 14688, 15264, 15264, 15840, 15840, 16416, 16416, 16992, 16992,
        17568, 17568, 18336, 18336, 19080, 19080, 19080, 19848, 19848, 19848,
        20616, 20616, 21384, 21384, 21384, 22152, 22152, 22152, 22920, 22920,
        23688, 23688, 23688, 24496, 24496, 24496, 25456, 25456, 25456, 25456,
        26416, 26416, 26416, 27376, 27376, 27376, 28336, 28336, 28336, 28336,
        29296, 29296, 29296, 30576, 30576, 30576, 30576, 30576, 31704, 31704,
    ],
    // I_TBS 15
    [
        280, 600, 904, 1224, 1544, 1800, 2152, 2472, 2728, 3112,
        3368, 3624, 4008, 4264, 4584, 4968, 5160, 5544, 5736, 6200,
        6456, 6712, 6968, 7480, 7736, 7992, 8248, 8504, 8760, 9144,
        9528, 9912, 10296, 10296, 10680, 11064, 11448, 11832, 11832, 12216,
        12576, 12960, 12960, 13536, 13536, 14112, 14688, 14688, 15264, 15264,
        15840, 15840, 16416, 16416, 16992, 16992, 17568, 17568, 18336, 18336,
        19080, 19080, 19080, 19848, 19848, 20616, 20616, 20616, 21384, 21384,
        22152, 22152, 22152, 22920, 22920, 23688, 23688, 23688, 24496, 24496,
        24496, 25456, 25456, 25456, 26416, 26416, 26416, 27376, 27376, 27376,
        28336, 28336, 28336, 29296, 29296, 29296, 29296, 30576, 30576, 30576,
        30576, 31704, 31704, 31704, 32856, 32856, 32856, 32856, 34008, 34008,
    ],
    // I_TBS 16
    [
        328, 632, 968, 1288, 1608, 1928, 2280, 2600, 2984, 3240,
        3624, 3880, 4264, 4584, 4968, 5160, 5544, 5992, 6200, 6456,
        6968, 7224, 7480, 7736, 8248, 8504, 8760, 9144, 9528, 9912,
        10296, 10680, 10680, 11064, 11448, 11832, 12216, 12576, 12960, 12960,
        13536, 13536, 14112, 14688, 14688, 15264, 15264, 15840, 15840, 16416,
        16992, 16992, 17568, 17568, 18336, 18336, 18336, 19080, 19080, 19848,
        19848, 20616, 20616, 21384, 21384, 21384, 22152, 22152, 22920, 22920,
        22920, 23688, 23688, 24496, 24496, 24496, 25456, 25456, 25456, 26416,
        26416, 27376, 27376, 27376, 28336, 28336, 28336, 29296, 29296, 29296,
        29296, 30576, 30576, 30576, 31704, 31704, 31704, 31704, 32856, 32856,
        32856, 34008, 34008, 34008, 34008, 35160, 35160, 35160, 35160, 36696,
    ],
    // I_TBS 17
    [
        336, 696, 1064, 1416, 1800, 2152, 2536, 2856, 3240, 3624,
        4008, 4392, 4776, 5160, 5352, 5736, 6200, 6456, 6712, 7224,
        7736, 7992, 8248, 8760, 9144, 9528, 9912, 10296, 10680, 11064,
        11448, 11448, 11832, 12216, 12576, 12960, 13536, 13536, 14112, 14688,
        14688, 15264, 15840, 15840, 16416, 16992, 16992, 17568, 17568, 18336,
        18336, 19080, 19080, 19848, 19848, 20616, 20616, 21384, 21384, 22152,
        22152, 22920, 22920, 22920, 23688, 23688, 24496, 24496, 25456, 25456,
        25456, 26416, 26416, 27376, 27376, 27376, 28336, 28336, 28336, 29296,
        29296, 29296, 30576, 30576, 30576, 31704, 31704, 31704, 32856, 32856,
        32856, 34008, 34008, 34008, 34008, 35160, 35160, 35160, 36696, 36696,
        36696, 36696, 37888, 37888, 37888, 39232, 39232, 39232, 39232, 40576,
    ],
    // I_TBS 18
    [
        376, 776, 1160, 1544, 1992, 2344, 2792, 3112, 3624, 4008,
        4392, 4776, 5160, 5544, 5992, 6200, 6712, 7224, 7480, 7992,
        8248, 8760, 9144, 9528, 9912, 10296, 10680, 11064, 11448, 11832,
        12216, 12576, 12960, 13536, 14112, 14112, 14688, 15264, 15264, 15840,
        16416, 16416, 16992, 17568, 17568, 18336, 18336, 19080, 19080, 19848,
        19848, 20616, 20616, 21384, 22152, 22152, 22920, 22920, 23688, 23688,
        24496, 24496, 24496, 25456, 25456, 26416, 26416, 27376, 27376, 27376,
        28336, 28336, 29296, 29296, 29296, 30576, 30576, 30576, 31704, 31704,
        31704, 32856, 32856, 32856, 34008, 34008, 34008, 35160, 35160, 35160,
        36696, 36696, 36696, 36696, 37888, 37888, 37888, 39232, 39232, 39232,
        40576, 40576, 40576, 40576, 42368, 42368, 42368, 42368, 43816, 43816,
    ],
    // I_TBS 19
    [
        408, 840, 1288, 1736, 2152, 2600, 2984, 3496, 3880, 4264,
        4776, 5160, 5544, 5992, 6456, 6968, 7224, 7736, 8248, 8504,
        9144, 9528, 9912, 10296, 10680, 11064, 11448, 12216, 12576, 12960,
        13536, 13536, 14112, 14688, 15264, 15264, 15840, 16416, 16992, 16992,
        17568, 18336, 18336, 19080, 19080, 19848, 20616, 20616, 21384, 21384,
        22152, 22152, 22920, 22920, 23688, 24496, 24496, 25456, 25456, 25456,
        26416, 26416, 27376, 27376, 28336, 28336, 29296, 29296, 29296, 30576,
        30576, 30576, 31704, 31704, 32856, 32856, 32856, 34008, 34008, 34008,
        35160, 35160, 35160, 36696, 36696, 36696, 37888, 37888, 37888, 39232,
        39232, 39232, 40576, 40576, 40576, 40576, 42368, 42368, 42368, 43816,
        43816, 43816, 43816, 45352, 45352, 45352, 46888, 46888, 46888, 46888,
    ],
    // I_TBS 20
    [
        440, 904, 1384, 1864, 2344, 2792, 3240, 3752, 4136, 4584,
        5160, 5544, 5992, 6456, 6968, 7480, 7992, 8248, 8760, 9144,
        9912, 10296, 10680, 11064, 11448, 12216, 12576, 12960, 13536, 14112,
        14112, 14688, 15264, 15840, 16416, 16992, 16992, 17568, 18336, 18336,
        19080, 19848, 19848, 20616, 20616, 21384, 22152, 22152, 22920, 22920,
        23688, 24496, 24496, 25456, 25456, 26416, 26416, 27376, 27376, 28336,
        28336, 29296, 29296, 29296, 30576, 30576, 31704, 31704, 31704, 32856,
        32856, 34008, 34008, 34008, 35160, 35160, 35160, 36696, 36696, 36696,
        37888, 37888, 39232, 39232, 39232, 40576, 40576, 40576, 40576, 42368,
        42368, 42368, 43816, 43816, 43816, 45352, 45352, 45352, 45352, 46888,
        46888, 46888, 46888, 48936, 48936, 48936, 48936, 51024, 51024, 51024,
    ],
    // I_TBS 21
    [
        488, 1000, 1480, 1992, 2472, 2984, 3496, 4008, 4584, 4968,
        5544, 5992, 6456, 6968, 7480, 7992, 8504, 9144, 9528, 9912,
        10680, 11064, 11448, 12216, 12576, 12960, 13536, 14112, 14688, 15264,
        15840, 15840, 16416, 16992, 17568, 18336, 18336, 19080, 19848, 19848,
        20616, 21384, 21384, 22152, 22920, 22920, 23688, 24496, 24496, 25456,
        25456, 26416, 26416, 27376, 27376, 28336, 28336, 29296, 29296, 30576,
        30576, 31704, 31704, 31704, 32856, 32856, 34008, 34008, 35160, 35160,
        35160, 36696, 36696, 36696, 37888, 37888, 39232, 39232, 39232, 40576,
        40576, 40576, 42368, 42368, 42368, 43816, 43816, 43816, 45352, 45352,
        45352, 46888, 46888, 46888, 46888, 48936, 48936, 48936, 48936, 51024,
        51024, 51024, 51024, 52752, 52752, 52752, 52752, 55056, 55056, 55056,
    ],
    // I_TBS 22
    [
        520, 1064, 1608, 2152, 2664, 3240, 3752, 4264, 4776, 5352,
        5992, 6456, 6968, 7480, 7992, 8504, 9144, 9528, 10296, 10680,
        11448, 11832, 12576, 12960, 13536, 14112, 14688, 15264, 15840, 16416,
        16992, 16992, 17568, 18336, 19080, 19080, 19848, 20616, 21384, 21384,
        22152, 22920, 22920, 23688, 24496, 24496, 25456, 25456, 26416, 27376,
        27376, 28336, 28336, 29296, 29296, 30576, 30576, 31704, 31704, 32856,
        32856, 34008, 34008, 34008, 35160, 35160, 36696, 36696, 36696, 37888,
        37888, 39232, 39232, 40576, 40576, 40576, 42368, 42368, 42368, 43816,
        43816, 43816, 45352, 45352, 45352, 46888, 46888, 46888, 48936, 48936,
        48936, 48936, 51024, 51024, 51024, 51024, 52752, 52752, 52752, 55056,
        55056, 55056, 55056, 55056, 57336, 57336, 57336, 59256, 59256, 59256,
    ],
    // I_TBS 23
    [
        552, 1128, 1736, 2280, 2856, 3496, 4008, 4584, 5160, 5736,
        6200, 6968, 7480, 7992, 8504, 9144, 9912, 10296, 11064, 11448,
        12216, 12576, 12960, 13536, 14112, 14688, 15264, 15840, 16416, 16992,
        17568, 18336, 19080, 19848, 19848, 20616, 21384, 22152, 22152, 22920,
        23688, 24496, 24496, 25456, 25456, 26416, 27376, 27376, 28336, 28336,
        29296, 29296, 30576, 30576, 31704, 31704, 32856, 32856, 34008, 34008,
        35160, 35160, 36696, 36696, 37888, 37888, 37888, 39232, 39232, 40576,
        40576, 40576, 42368, 42368, 43816, 43816, 43816, 45352, 45352, 45352,
        46888, 46888, 46888, 48936, 48936, 48936, 51024, 51024, 51024, 51024,
        52752, 52752, 52752, 55056, 55056, 55056, 55056, 57336, 57336, 57336,
        57336, 59256, 59256, 59256, 59256, 61664, 61664, 61664, 61664, 63776,
    ],
    // I_TBS 24
    [
        584, 1192, 1800, 2408, 2984, 3624, 4264, 4968, 5544, 5992,
        6712, 7224, 7992, 8504, 9144, 9912, 10296, 11064, 11448, 12216,
        12960, 13536, 14112, 14688, 15264, 15840, 16416, 16992, 17568, 18336,
        19080, 19848, 19848, 20616, 21384, 22152, 22920, 22920, 23688, 24496,
        25456, 25456, 26416, 26416, 27376, 28336, 28336, 29296, 30576, 30576,
        31704, 31704, 32856, 32856, 34008, 34008, 35160, 35160, 36696, 36696,
        36696, 37888, 37888, 39232, 39232, 40576, 40576, 42368, 42368, 42368,
        43816, 43816, 45352, 45352, 45352, 46888, 46888, 46888, 48936, 48936,
        48936, 51024, 51024, 51024, 52752, 52752, 52752, 52752, 55056, 55056,
        55056, 57336, 57336, 57336, 57336, 59256, 59256, 59256, 61664, 61664,
        61664, 61664, 63776, 63776, 63776, 63776, 66592, 66592, 66592, 66592,
    ],
    // I_TBS 25
    [
        616, 1256, 1864, 2536, 3112, 3752, 4392, 5160, 5736, 6200,
        6968, 7480, 8248, 8760, 9528, 10296, 10680, 11448, 12216, 12576,
        13536, 14112, 14688, 15264, 15840, 16416, 16992, 17568, 18336, 19080,
        19848, 20616, 20616, 21384, 22152, 22920, 23688, 24496, 24496, 25456,
        26416, 26416, 27376, 28336, 28336, 29296, 29296, 30576, 30576, 31704,
        32856, 32856, 34008, 34008, 35160, 35160, 36696, 36696, 37888, 37888,
        39232, 39232, 40576, 40576, 40576, 42368, 42368, 43816, 43816, 43816,
        45352, 45352, 46888, 46888, 46888, 48936, 48936, 48936, 51024, 51024,
        51024, 52752, 52752, 52752, 55056, 55056, 55056, 55056, 57336, 57336,
        57336, 59256, 59256, 59256, 59256, 61664, 61664, 61664, 63776, 63776,
        63776, 63776, 66592, 66592, 66592, 66592, 68808, 68808, 68808, 68808,
    ],
    // I_TBS 26
    [
        712, 1480, 2216, 2984, 3752, 4392, 5160, 5992, 6712, 7480,
        8248, 8760, 9528, 10296, 11064, 11832, 12576, 13536, 14112, 14688,
        15840, 16416, 16992, 17568, 18336, 19080, 19848, 20616, 21384, 22152,
        22920, 23688, 24496, 25456, 26416, 26416, 27376, 28336, 29296, 29296,
        30576, 31704, 31704, 32856, 34008, 34008, 35160, 35160, 36696, 37888,
        37888, 39232, 39232, 40576, 40576, 42368, 42368, 43816, 43816, 45352,
        45352, 46888, 46888, 46888, 48936, 48936, 51024, 51024, 51024, 52752,
        52752, 52752, 55056, 55056, 55056, 57336, 57336, 57336, 59256, 59256,
        61664, 61664, 61664, 63776, 63776, 63776, 63776, 66592, 66592, 66592,
        68808, 68808, 68808, 71112, 71112, 71112, 73712, 73712, 73712, 75376,
        75376, 75376, 75376, 75376, 75376, 75376, 75376, 75376, 75376, 75376,
    ],
];

/// MCS for a wideband downlink CQI
pub fn mcs_from_cqi(cqi: Cqi) -> Mcs {
    let mcs = CQI_TO_MCS[cqi.value() as usize];
    Mcs::new(mcs).unwrap_or(Mcs::QAM64_CEILING)
}

/// Transport block size index for an MCS in a direction
pub fn itbs_from_mcs(mcs: Mcs, dir: Direction) -> u8 {
    match dir {
        Direction::Dl => DL_MCS_TO_ITBS[mcs.value() as usize],
        Direction::Ul => UL_MCS_TO_ITBS[mcs.value() as usize],
    }
}

/// Transport block size in bits for `n_rb` resource blocks
///
/// Zero RBs carry zero bits.
///
/// # Panics
///
/// Panics if `itbs > MAX_ITBS` or `n_rb > MAX_RB`.
pub fn tbs_bits(itbs: u8, n_rb: u32) -> u32 {
    assert!(itbs <= MAX_ITBS, "I_TBS {} outside TBS table", itbs);
    assert!(n_rb <= MAX_RB, "{} RBs outside TBS table", n_rb);

    match n_rb {
        0 => 0,
        n => TBS_TABLE[itbs as usize][n as usize - 1],
    }
}

/// Transport block size in bytes
pub fn tbs_bytes(itbs: u8, n_rb: u32) -> u32 {
    tbs_bits(itbs, n_rb) / 8
}

/// Buffered bytes signalled by a BSR index
pub fn bsr_bytes(index: BsrIndex) -> u32 {
    BSR_TABLE[index.value() as usize]
}

/// Smallest BSR index whose buffer size level covers `bytes`
pub fn bsr_index_for_bytes(bytes: u32) -> BsrIndex {
    let index = BSR_TABLE
        .iter()
        .position(|&level| level >= bytes)
        .unwrap_or(BSR_TABLE.len() - 1);

    BsrIndex::new(index as u8).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mcs_from_cqi_monotonic() {
        let mut previous = 0;
        for cqi in 0..=Cqi::MAX {
            let mcs = mcs_from_cqi(Cqi::new(cqi).unwrap()).value();
            assert!(mcs >= previous, "MCS decreased at CQI {}", cqi);
            previous = mcs;
        }
        assert_eq!(mcs_from_cqi(Cqi::new(10).unwrap()).value(), 18);
        assert_eq!(mcs_from_cqi(Cqi::new(15).unwrap()).value(), 28);
    }

    #[test]
    fn test_itbs_tables() {
        let mcs = |v| Mcs::new(v).unwrap();
        assert_eq!(itbs_from_mcs(mcs(18), Direction::Dl), 16);
        assert_eq!(itbs_from_mcs(mcs(10), Direction::Dl), 9);
        assert_eq!(itbs_from_mcs(mcs(28), Direction::Dl), 26);
        assert_eq!(itbs_from_mcs(mcs(8), Direction::Ul), 8);
        assert_eq!(itbs_from_mcs(mcs(11), Direction::Ul), 10);
        assert_eq!(itbs_from_mcs(mcs(28), Direction::Ul), 26);
    }

    #[test]
    fn test_tbs_table_values() {
        assert_eq!(tbs_bits(0, 1), 16);
        assert_eq!(tbs_bits(0, 2), 32);
        assert_eq!(tbs_bits(0, 4), 88);
        assert_eq!(tbs_bits(9, 6), 936);
        assert_eq!(tbs_bits(9, 10), 1544);
        assert_eq!(tbs_bits(16, 36), 11832);
        assert_eq!(tbs_bits(16, 50), 16416);
        assert_eq!(tbs_bits(0, 110), 3112);
        assert_eq!(tbs_bits(26, 100), 75376);
        assert_eq!(tbs_bits(5, 0), 0);
    }

    #[test]
    fn test_tbs_monotonic_and_byte_aligned() {
        for itbs in 0..=MAX_ITBS {
            for n_rb in 0..MAX_RB {
                assert!(tbs_bits(itbs, n_rb) <= tbs_bits(itbs, n_rb + 1));
                assert_eq!(tbs_bits(itbs, n_rb + 1) % 8, 0);
                if itbs < MAX_ITBS {
                    assert!(tbs_bits(itbs, n_rb) <= tbs_bits(itbs + 1, n_rb));
                }
            }
        }
    }

    #[test]
    #[should_panic]
    fn test_tbs_rejects_large_rb_count() {
        tbs_bits(0, MAX_RB + 1);
    }

    #[test]
    #[should_panic]
    fn test_tbs_rejects_unknown_itbs() {
        tbs_bits(MAX_ITBS + 1, 10);
    }

    #[test]
    fn test_bsr_mapping() {
        assert_eq!(bsr_bytes(BsrIndex::new(0).unwrap()), 0);
        assert_eq!(bsr_bytes(BsrIndex::new(1).unwrap()), 10);
        assert_eq!(bsr_bytes(BsrIndex::new(63).unwrap()), 150000);

        assert_eq!(bsr_index_for_bytes(0).value(), 0);
        assert_eq!(bsr_index_for_bytes(10).value(), 1);
        assert_eq!(bsr_index_for_bytes(11).value(), 2);
        assert_eq!(bsr_index_for_bytes(1_000_000).value(), 63);
    }
}
