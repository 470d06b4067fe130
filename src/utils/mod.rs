pub mod mp3_scanner;
