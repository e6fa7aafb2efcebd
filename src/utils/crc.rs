/// CRC32 for MPEG-2 TS PSI sections (ITU-T H.222.0 / ISO/IEC 13818-1).
/// Polynomial: x32 + x26 + x23 + x22 + x16 + x12 + x11 + x10 + x8 + x7 + x5 + x4 + x2 + x + 1
/// Initial value: 0xFFFFFFFF, no reflection, no final xor.
const CRC32_MPEG2: u32 = 0x04C11DB7;

/// MPEG-2 CRC32 calculator used for PAT/PMT section validation.
pub struct Crc32Mpeg2 {
    table: [u32; 256],
}

impl Crc32Mpeg2 {
    /// Creates a new CRC32 calculator with a pre-computed lookup table.
    pub fn new() -> Self {
        let mut table = [0u32; 256];
        for (i, entry) in table.iter_mut().enumerate() {
            let mut crc = (i as u32) << 24;
            for _ in 0..8 {
                crc = if (crc & 0x80000000) != 0 {
                    (crc << 1) ^ CRC32_MPEG2
                } else {
                    crc << 1
                };
            }
            *entry = crc;
        }
        Self { table }
    }

    /// Calculates the CRC32 checksum of `data`.
    ///
    /// ```
    /// use tsdemux::utils::Crc32Mpeg2;
    ///
    /// let crc = Crc32Mpeg2::new();
    /// let checksum = crc.calculate(&[0x01, 0x02, 0x03]);
    /// assert_ne!(checksum, 0);
    /// ```
    pub fn calculate(&self, data: &[u8]) -> u32 {
        let mut crc = 0xFFFFFFFF;
        for &byte in data {
            let index = ((crc >> 24) ^ (byte as u32)) & 0xFF;
            crc = (crc << 8) ^ self.table[index as usize];
        }
        crc
    }

    /// Checks a section whose last four bytes are its big-endian CRC.
    ///
    /// Running the register over data followed by its own CRC leaves zero.
    pub fn verify(&self, data_with_crc: &[u8]) -> bool {
        data_with_crc.len() >= 4 && self.calculate(data_with_crc) == 0
    }
}

impl Default for Crc32Mpeg2 {
    fn default() -> Self {
        Self::new()
    }
}
